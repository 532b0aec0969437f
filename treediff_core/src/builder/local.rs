use crate::node::{truncate_to_millis, ContentSource, DirNode, Leaf};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::debug;
use treediff_common::{ErrorPolicy, Result, TreeDiffError};

/// Builds a tree from a local filesystem path.
///
/// Regular files keep a `Disk` content source, so no file content is read
/// during the build; digests and sniffs happen lazily when a comparison
/// asks for them. Unreadable entries are routed through the error policy
/// and skipped when it allows continuing.
pub struct LocalTreeBuilder {
    follow_symlinks: bool,
}

impl LocalTreeBuilder {
    pub fn new(follow_symlinks: bool) -> Self {
        Self { follow_symlinks }
    }

    /// Build a tree rooted at `path`. A non-directory path yields a
    /// singleton tree wrapping that one entry.
    pub fn build(&self, path: &Path, policy: &dyn ErrorPolicy) -> Result<DirNode> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = self.entry_metadata(path)?;

        let mut tree = if metadata.is_dir() {
            let mut dir = DirNode::new(name);
            self.scan_dir(path, &mut dir, policy)?;
            dir
        } else {
            DirNode::singleton(self.build_leaf(path, &name, policy)?.ok_or_else(|| {
                TreeDiffError::Builder(format!("cannot read {}", path.display()))
            })?)
        };
        tree.root = Some(path.to_path_buf());
        debug!(
            "built local tree {:?}: {} subdirs, {} files",
            tree.name,
            tree.dirs.len(),
            tree.files.len()
        );
        Ok(tree)
    }

    fn scan_dir(&self, path: &Path, node: &mut DirNode, policy: &dyn ErrorPolicy) -> Result<()> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                let error = TreeDiffError::Io(e);
                if policy.handle_error(&error) {
                    return Ok(());
                }
                return Err(error);
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let error = TreeDiffError::Io(e);
                    if policy.handle_error(&error) {
                        continue;
                    }
                    return Err(error);
                }
            };
            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            let metadata = match self.entry_metadata(&entry_path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    if policy.handle_error(&error) {
                        continue;
                    }
                    return Err(error);
                }
            };

            if metadata.is_dir() {
                let mut sub = DirNode::new(name);
                self.scan_dir(&entry_path, &mut sub, policy)?;
                node.dirs.push(sub);
            } else if let Some(leaf) = self.build_leaf(&entry_path, &name, policy)? {
                node.files.push(leaf);
            }
        }
        node.sort_children();
        Ok(())
    }

    /// Classify one non-directory entry. Returns `None` when the entry was
    /// unreadable and the policy chose to continue.
    fn build_leaf(
        &self,
        path: &Path,
        name: &str,
        policy: &dyn ErrorPolicy,
    ) -> Result<Option<Leaf>> {
        let leaf = match self.try_build_leaf(path, name) {
            Ok(leaf) => leaf,
            Err(error) => {
                if policy.handle_error(&error) {
                    return Ok(None);
                }
                return Err(error);
            }
        };
        Ok(Some(leaf))
    }

    fn try_build_leaf(&self, path: &Path, name: &str) -> Result<Leaf> {
        let metadata = self.entry_metadata(path)?;
        let mtime = modified_time(&metadata)?;
        let file_type = metadata.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(path)?.to_string_lossy().into_owned();
            Ok(Leaf::symlink(name, mtime, target))
        } else if file_type.is_file() {
            Ok(Leaf::regular(
                name,
                metadata.len(),
                mtime,
                ContentSource::Disk(path.to_path_buf()),
            ))
        } else {
            // Device nodes, sockets, fifos
            Ok(Leaf::special(name, metadata.len(), mtime))
        }
    }

    fn entry_metadata(&self, path: &Path) -> Result<fs::Metadata> {
        let metadata = if self.follow_symlinks {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };
        Ok(metadata)
    }
}

fn modified_time(metadata: &fs::Metadata) -> Result<DateTime<Utc>> {
    Ok(truncate_to_millis(DateTime::<Utc>::from(metadata.modified()?)))
}
