use crate::node::{ContentSource, DirNode, Leaf};
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use treediff_common::{ErrorPolicy, Result, TreeDiffError};
use zip::read::ZipFile;
use zip::ZipArchive;

const SYMLINK_MODE_MASK: u32 = 0o170000;
const SYMLINK_MODE: u32 = 0o120000;

/// Builds a tree from a zip archive, letting an archive stand in for a
/// directory on either side of a comparison.
///
/// Entry bytes are held in memory and each entry's stored CRC32 is seeded
/// into the leaf, so a digest comparison against another tree costs no
/// decompression beyond the build itself.
pub struct ZipTreeBuilder;

impl ZipTreeBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, path: &Path, policy: &dyn ErrorPolicy) -> Result<DirNode> {
        let file = fs::File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            TreeDiffError::Builder(format!("cannot open archive {}: {e}", path.display()))
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut root = DirNode::new(name);

        for index in 0..archive.len() {
            if let Err(error) = self.add_entry(&mut archive, index, &mut root) {
                if policy.handle_error(&error) {
                    continue;
                }
                return Err(error);
            }
        }

        root.sort_recursive();
        root.root = Some(path.to_path_buf());
        debug!("built archive tree {:?} from {} entries", root.name, archive.len());
        Ok(root)
    }

    fn add_entry(
        &self,
        archive: &mut ZipArchive<fs::File>,
        index: usize,
        root: &mut DirNode,
    ) -> Result<()> {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| TreeDiffError::Builder(format!("bad archive entry {index}: {e}")))?;

        // Entry names use forward slashes regardless of platform
        let entry_name = entry.name().to_string();
        let components: Vec<&str> = entry_name.split('/').filter(|c| !c.is_empty()).collect();
        let Some((&leaf_name, dir_components)) = components.split_last() else {
            return Ok(());
        };

        if entry.is_dir() {
            ensure_dir(root, &components);
            return Ok(());
        }

        let parent = ensure_dir(root, dir_components);
        let mtime = entry_mtime(&entry);
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;

        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & SYMLINK_MODE_MASK == SYMLINK_MODE);
        let leaf = if is_symlink {
            let target = String::from_utf8_lossy(&bytes).into_owned();
            Leaf::symlink(leaf_name, mtime, target)
        } else {
            let leaf = Leaf::regular(
                leaf_name,
                bytes.len() as u64,
                mtime,
                ContentSource::Memory(bytes),
            );
            leaf.memoize_crc32(entry.crc32());
            leaf
        };
        parent.files.push(leaf);
        Ok(())
    }
}

impl Default for ZipTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk (and create as needed) the nested directory at `components`.
fn ensure_dir<'t>(mut node: &'t mut DirNode, components: &[&str]) -> &'t mut DirNode {
    for component in components {
        let index = match node.dirs.iter().position(|d| d.name == *component) {
            Some(index) => index,
            None => {
                node.dirs.push(DirNode::new(*component));
                node.dirs.len() - 1
            }
        };
        node = &mut node.dirs[index];
    }
    node
}

/// Zip timestamps are local wall-clock with two-second resolution; they are
/// taken at face value as UTC.
fn entry_mtime(entry: &ZipFile) -> DateTime<Utc> {
    let dt = entry.last_modified();
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
    .unwrap_or_default()
}
