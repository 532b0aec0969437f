use crate::content::{looks_like_text, ContentMethod, Cost};
use chrono::{DateTime, TimeZone, Utc};
use md5::{Digest, Md5};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use treediff_common::{Result, TreeDiffError};

/// Kind of a leaf entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Symlink,
    Special,
}

/// Where a leaf's bytes live. Cost reporting and content access are driven
/// by this, so a snapshot-reconstructed file naturally reports byte-level
/// methods as impossible while its recorded digests stay cheap.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Bytes live on the local filesystem at the given absolute path.
    Disk(PathBuf),
    /// Bytes held in memory (archive entries, tests).
    Memory(Vec<u8>),
    /// Reconstructed from a snapshot: recorded digests only, no raw bytes.
    Captured {
        crc32: Option<u32>,
        md5: Option<[u8; 16]>,
    },
}

/// A file-like entry: regular file, symlink, or special file.
///
/// Digests are computed lazily and memoized per instance, so comparing one
/// leaf against several peers hashes its content at most once.
#[derive(Debug, Clone)]
pub struct Leaf {
    /// Single path segment, never contains a separator
    pub name: String,
    /// Absolute origin path, set only on a subtree's logical root
    pub root: Option<PathBuf>,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub kind: FileKind,
    /// Symlink target; its byte length always equals `size`
    pub link_target: Option<String>,
    source: ContentSource,
    crc32: OnceCell<u32>,
    md5: OnceCell<[u8; 16]>,
    text: OnceCell<bool>,
}

impl Leaf {
    pub fn regular(
        name: impl Into<String>,
        size: u64,
        mtime: DateTime<Utc>,
        source: ContentSource,
    ) -> Self {
        Self {
            name: name.into(),
            root: None,
            size,
            mtime,
            kind: FileKind::Regular,
            link_target: None,
            source,
            crc32: OnceCell::new(),
            md5: OnceCell::new(),
            text: OnceCell::new(),
        }
    }

    pub fn symlink(name: impl Into<String>, mtime: DateTime<Utc>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            name: name.into(),
            root: None,
            size: target.len() as u64,
            mtime,
            kind: FileKind::Symlink,
            link_target: Some(target),
            source: ContentSource::Captured {
                crc32: None,
                md5: None,
            },
            crc32: OnceCell::new(),
            md5: OnceCell::new(),
            text: OnceCell::new(),
        }
    }

    pub fn special(name: impl Into<String>, size: u64, mtime: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            root: None,
            size,
            mtime,
            kind: FileKind::Special,
            link_target: None,
            source: ContentSource::Captured {
                crc32: None,
                md5: None,
            },
            crc32: OnceCell::new(),
            md5: OnceCell::new(),
            text: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    /// Seed a CRC32 computed elsewhere (archive directory entry, snapshot).
    pub fn memoize_crc32(&self, value: u32) {
        let _ = self.crc32.set(value);
    }

    /// Seed an MD5 computed elsewhere.
    pub fn memoize_md5(&self, value: [u8; 16]) {
        let _ = self.md5.set(value);
    }

    /// Seed the text flag, bypassing the on-demand sniff.
    pub fn memoize_is_text(&self, value: bool) {
        let _ = self.text.set(value);
    }

    /// Relative expense of one comparison method for this instance.
    pub fn cost(&self, method: ContentMethod) -> Cost {
        match self.kind {
            // No readable content stream at all
            FileKind::Special => Cost::Impossible,
            // The target string is the readable content
            FileKind::Symlink => match method {
                ContentMethod::RawBytes | ContentMethod::TextNormalized => Cost::Easy,
                ContentMethod::Crc32 | ContentMethod::Md5 => Cost::Moderate,
            },
            FileKind::Regular => match &self.source {
                ContentSource::Disk(_) => match method {
                    ContentMethod::RawBytes | ContentMethod::TextNormalized => Cost::Moderate,
                    ContentMethod::Crc32 => {
                        if self.crc32.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Hard
                        }
                    }
                    ContentMethod::Md5 => {
                        if self.md5.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Hard
                        }
                    }
                },
                ContentSource::Memory(_) => match method {
                    ContentMethod::RawBytes | ContentMethod::TextNormalized => Cost::Easy,
                    ContentMethod::Crc32 => {
                        if self.crc32.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Moderate
                        }
                    }
                    ContentMethod::Md5 => {
                        if self.md5.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Moderate
                        }
                    }
                },
                ContentSource::Captured { crc32, md5 } => match method {
                    ContentMethod::RawBytes | ContentMethod::TextNormalized => Cost::Impossible,
                    ContentMethod::Crc32 => {
                        if crc32.is_some() || self.crc32.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Impossible
                        }
                    }
                    ContentMethod::Md5 => {
                        if md5.is_some() || self.md5.get().is_some() {
                            Cost::Easy
                        } else {
                            Cost::Impossible
                        }
                    }
                },
            },
        }
    }

    /// Open the readable byte stream. Symlinks expose their target string;
    /// snapshot-reconstructed regular files have no stream.
    pub fn open_reader(&self) -> Result<Box<dyn Read + '_>> {
        if self.kind == FileKind::Symlink {
            let target = self.link_target.as_deref().unwrap_or("");
            return Ok(Box::new(Cursor::new(target.as_bytes())));
        }
        if self.kind == FileKind::Special {
            return Err(TreeDiffError::Comparison(format!(
                "special file {:?} has no readable content",
                self.name
            )));
        }
        match &self.source {
            ContentSource::Disk(path) => Ok(Box::new(std::fs::File::open(path)?)),
            ContentSource::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.as_slice()))),
            ContentSource::Captured { .. } => Err(TreeDiffError::Comparison(format!(
                "content of {:?} is not recoverable from a snapshot",
                self.name
            ))),
        }
    }

    /// CRC32 of the content, memoized per instance.
    pub fn crc32(&self) -> Result<u32> {
        if let Some(value) = self.crc32.get() {
            return Ok(*value);
        }
        if self.kind == FileKind::Regular {
            if let ContentSource::Captured { crc32, .. } = &self.source {
                return match crc32 {
                    Some(value) => {
                        let _ = self.crc32.set(*value);
                        Ok(*value)
                    }
                    None => Err(TreeDiffError::Comparison(format!(
                        "no CRC32 recorded for {:?}",
                        self.name
                    ))),
                };
            }
        }

        let mut reader = self.open_reader()?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        let value = hasher.finalize();
        let _ = self.crc32.set(value);
        Ok(value)
    }

    /// MD5 of the content, memoized per instance.
    pub fn md5(&self) -> Result<[u8; 16]> {
        if let Some(value) = self.md5.get() {
            return Ok(*value);
        }
        if self.kind == FileKind::Regular {
            if let ContentSource::Captured { md5, .. } = &self.source {
                return match md5 {
                    Some(value) => {
                        let _ = self.md5.set(*value);
                        Ok(*value)
                    }
                    None => Err(TreeDiffError::Comparison(format!(
                        "no MD5 recorded for {:?}",
                        self.name
                    ))),
                };
            }
        }

        let mut reader = self.open_reader()?;
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        let value: [u8; 16] = hasher.finalize().into();
        let _ = self.md5.set(value);
        Ok(value)
    }

    /// Heuristic binary/text sniff over the leading bytes: text means no
    /// control bytes other than common whitespace; an empty file is text.
    pub fn is_text(&self) -> Result<bool> {
        if let Some(value) = self.text.get() {
            return Ok(*value);
        }
        let value = match (self.kind, &self.source) {
            (FileKind::Special, _) => false,
            (FileKind::Regular, ContentSource::Captured { .. }) => false,
            _ => {
                let mut reader = self.open_reader()?;
                let mut buffer = vec![0u8; 8 * 1024];
                let mut len = 0;
                while len < buffer.len() {
                    let n = reader.read(&mut buffer[len..])?;
                    if n == 0 {
                        break;
                    }
                    len += n;
                }
                looks_like_text(&buffer[..len])
            }
        };
        let _ = self.text.set(value);
        Ok(value)
    }
}

/// A directory entry owning name-sorted child directories and leaves.
///
/// No two children across both lists may share the exact same name; that is
/// a data-integrity violation detected at comparison or serialization time.
#[derive(Debug, Clone)]
pub struct DirNode {
    pub name: String,
    /// Absolute origin path, set only on a subtree's logical root
    pub root: Option<PathBuf>,
    pub dirs: Vec<DirNode>,
    pub files: Vec<Leaf>,
}

impl DirNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Wrap a single leaf in a directory of the same name.
    pub fn singleton(leaf: Leaf) -> Self {
        Self {
            name: leaf.name.clone(),
            root: None,
            dirs: Vec::new(),
            files: vec![leaf],
        }
    }

    /// Copy with a new identity, used when re-rooting a subtree.
    pub fn with_identity(&self, name: impl Into<String>, root: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root,
            dirs: self.dirs.clone(),
            files: self.files.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }

    pub fn dir(&self, name: &str) -> Option<&DirNode> {
        self.dirs.iter().find(|d| d.name == name)
    }

    pub fn file(&self, name: &str) -> Option<&Leaf> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Exact-duplicate names across a directory's children are malformed
    /// input, even under case-insensitive matching.
    pub fn check_unique_child_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in self
            .dirs
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.files.iter().map(|f| f.name.as_str()))
        {
            if !seen.insert(name) {
                return Err(TreeDiffError::DuplicateName {
                    dir: self.name.clone(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Sort immediate children by name.
    pub fn sort_children(&mut self) {
        self.dirs.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Sort the whole subtree by name.
    pub fn sort_recursive(&mut self) {
        self.sort_children();
        for dir in &mut self.dirs {
            dir.sort_recursive();
        }
    }
}

/// Drop sub-millisecond precision so timestamps survive a snapshot
/// round-trip unchanged.
pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(time.timestamp_millis())
        .single()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    #[test]
    fn test_symlink_size_equals_target_length() {
        let leaf = Leaf::symlink("link", epoch(), "../target");
        assert_eq!(leaf.size, 9);
        assert_eq!(leaf.link_target.as_deref(), Some("../target"));
    }

    #[test]
    fn test_symlink_reads_target_bytes() {
        let leaf = Leaf::symlink("link", epoch(), "abc");
        let mut content = String::new();
        leaf.open_reader().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");
    }

    #[test]
    fn test_digest_memoization() {
        let leaf = Leaf::regular("a", 3, epoch(), ContentSource::Memory(b"abc".to_vec()));
        assert_eq!(leaf.cost(ContentMethod::Crc32), Cost::Moderate);

        let first = leaf.crc32().unwrap();
        assert_eq!(leaf.cost(ContentMethod::Crc32), Cost::Easy);
        assert_eq!(leaf.crc32().unwrap(), first);
    }

    #[test]
    fn test_captured_costs() {
        let leaf = Leaf::regular(
            "a",
            3,
            epoch(),
            ContentSource::Captured {
                crc32: Some(1),
                md5: None,
            },
        );
        assert_eq!(leaf.cost(ContentMethod::RawBytes), Cost::Impossible);
        assert_eq!(leaf.cost(ContentMethod::TextNormalized), Cost::Impossible);
        assert_eq!(leaf.cost(ContentMethod::Crc32), Cost::Easy);
        assert_eq!(leaf.cost(ContentMethod::Md5), Cost::Impossible);
        assert!(leaf.open_reader().is_err());
        assert!(leaf.md5().is_err());
    }

    #[test]
    fn test_special_has_no_content() {
        let leaf = Leaf::special("dev", 0, epoch());
        assert_eq!(leaf.cost(ContentMethod::RawBytes), Cost::Impossible);
        assert!(!leaf.is_text().unwrap());
    }

    #[test]
    fn test_singleton_and_identity_copy() {
        let leaf = Leaf::regular("file.txt", 0, epoch(), ContentSource::Memory(Vec::new()));
        let dir = DirNode::singleton(leaf);
        assert_eq!(dir.name, "file.txt");
        assert_eq!(dir.files.len(), 1);

        let rerooted = dir.with_identity("renamed", Some(PathBuf::from("/tmp/x")));
        assert_eq!(rerooted.name, "renamed");
        assert_eq!(rerooted.root.as_deref(), Some(std::path::Path::new("/tmp/x")));
        assert_eq!(rerooted.files.len(), 1);
    }

    #[test]
    fn test_sort_children() {
        let mut dir = DirNode::new("root");
        dir.dirs.push(DirNode::new("zeta"));
        dir.dirs.push(DirNode::new("alpha"));
        dir.files
            .push(Leaf::regular("b", 0, epoch(), ContentSource::Memory(Vec::new())));
        dir.files
            .push(Leaf::regular("a", 0, epoch(), ContentSource::Memory(Vec::new())));

        dir.sort_children();
        assert_eq!(dir.dirs[0].name, "alpha");
        assert_eq!(dir.files[0].name, "a");
    }

    #[test]
    fn test_truncate_to_millis() {
        let time = Utc.timestamp_opt(1_700_000_000, 123_456_789).single().unwrap();
        let truncated = truncate_to_millis(time);
        assert_eq!(truncated.timestamp_subsec_millis(), 123);
        assert_eq!(truncated.timestamp_subsec_micros() % 1000, 0);
    }
}
