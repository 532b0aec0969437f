use super::{decode_name, parse_time, DigestKind, SnapshotInfo, FORMAT_VERSION, ROOT_ELEMENT};
use crate::node::{ContentSource, DirNode, Leaf};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;
use treediff_common::{Result, TreeDiffError};

/// Read a snapshot document back into a tree plus its capture metadata.
///
/// The parser is strict: unknown elements or attributes, misplaced text,
/// malformed digests, duplicate names and structural deviations are all
/// rejected with the line and column of the offending content. Files come
/// back with a `Captured` content source carrying the recorded digests.
pub fn read_snapshot<R: Read>(mut input: R) -> Result<(DirNode, SnapshotInfo)> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let source = String::from_utf8(raw).map_err(|_| TreeDiffError::Snapshot {
        line: 1,
        column: 1,
        message: "snapshot is not valid UTF-8".to_string(),
    })?;
    Parser::new(&source).parse_document()
}

struct Parser<'s> {
    reader: Reader<&'s [u8]>,
    source: &'s str,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        let mut reader = Reader::from_str(source);
        reader.config_mut().check_end_names = true;
        Self { reader, source }
    }

    fn error(&self, message: impl Into<String>) -> TreeDiffError {
        let offset = (self.reader.buffer_position() as usize).min(self.source.len());
        let mut line = 1u64;
        let mut column = 1u64;
        for byte in &self.source.as_bytes()[..offset] {
            if *byte == b'\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        TreeDiffError::Snapshot {
            line,
            column,
            message: message.into(),
        }
    }

    fn next_event(&mut self) -> Result<Event<'s>> {
        match self.reader.read_event() {
            Ok(event) => Ok(event),
            Err(e) => Err(self.error(format!("malformed XML: {e}"))),
        }
    }

    /// Next structural event, skipping comments and insignificant
    /// whitespace. Non-whitespace text between elements is rejected.
    fn next_element_event(&mut self) -> Result<Event<'s>> {
        loop {
            match self.next_event()? {
                Event::Comment(_) => continue,
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.error(format!("bad character data: {e}")))?;
                    if text.trim().is_empty() {
                        continue;
                    }
                    return Err(self.error(format!("unexpected text {:?}", text.trim())));
                }
                Event::CData(_) => return Err(self.error("unexpected CDATA section")),
                event => return Ok(event),
            }
        }
    }

    fn parse_document(&mut self) -> Result<(DirNode, SnapshotInfo)> {
        let root = loop {
            match self.next_event()? {
                Event::Decl(_) | Event::DocType(_) | Event::Comment(_) | Event::PI(_) => continue,
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.error(format!("bad character data: {e}")))?;
                    if !text.trim().is_empty() {
                        return Err(self.error("unexpected text before root element"));
                    }
                }
                Event::Start(e) => break e,
                Event::Empty(e) => {
                    if e.name().as_ref() != ROOT_ELEMENT.as_bytes() {
                        return Err(self.error(format!(
                            "expected <{ROOT_ELEMENT}> root element, found <{}>",
                            String::from_utf8_lossy(e.name().as_ref())
                        )));
                    }
                    return Err(self.error("snapshot root element is empty"));
                }
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content before root element")),
            }
        };
        if root.name().as_ref() != ROOT_ELEMENT.as_bytes() {
            return Err(self.error(format!(
                "expected <{ROOT_ELEMENT}> root element, found <{}>",
                String::from_utf8_lossy(root.name().as_ref())
            )));
        }
        let mut attrs = self.parse_attrs(&root, ROOT_ELEMENT, &["version"])?;
        let version = self.required_attr(&mut attrs, "version", ROOT_ELEMENT)?;
        if version != FORMAT_VERSION {
            return Err(self.error(format!("unsupported snapshot version {version:?}")));
        }

        let mut time = None;
        let mut user = None;
        let mut host = None;
        let mut comment = None;
        let mut digests: Option<Vec<DigestKind>> = None;
        let mut tree: Option<DirNode> = None;

        loop {
            match self.next_element_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"captured" => {
                        self.check_single(time.is_some(), "captured")?;
                        self.parse_attrs(&e, "captured", &[])?;
                        let text = self.read_element_text("captured")?;
                        time = Some(parse_time(text.trim()).map_err(|msg| self.error(msg))?);
                    }
                    b"user" => {
                        self.check_single(user.is_some(), "user")?;
                        self.parse_attrs(&e, "user", &[])?;
                        user = Some(self.read_element_text("user")?);
                    }
                    b"host" => {
                        self.check_single(host.is_some(), "host")?;
                        self.parse_attrs(&e, "host", &[])?;
                        host = Some(self.read_element_text("host")?);
                    }
                    b"comment" => {
                        self.check_single(comment.is_some(), "comment")?;
                        self.parse_attrs(&e, "comment", &[])?;
                        comment = Some(self.read_element_text("comment")?);
                    }
                    b"digests" => {
                        self.check_single(digests.is_some(), "digests")?;
                        self.parse_attrs(&e, "digests", &[])?;
                        digests = Some(self.parse_digest_manifest()?);
                    }
                    b"dir" => {
                        self.check_single(tree.is_some(), "dir")?;
                        let manifest = digests
                            .as_deref()
                            .ok_or_else(|| self.error("<digests> must precede the tree"))?
                            .to_vec();
                        tree = Some(self.parse_dir(&e, true, &manifest)?);
                    }
                    other => {
                        return Err(self.error(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"digests" => {
                        self.check_single(digests.is_some(), "digests")?;
                        self.parse_attrs(&e, "digests", &[])?;
                        digests = Some(Vec::new());
                    }
                    b"dir" => {
                        self.check_single(tree.is_some(), "dir")?;
                        if digests.is_none() {
                            return Err(self.error("<digests> must precede the tree"));
                        }
                        tree = Some(DirNode::new(self.parse_dir_name(&e, true)?));
                    }
                    b"user" => {
                        self.check_single(user.is_some(), "user")?;
                        self.parse_attrs(&e, "user", &[])?;
                        user = Some(String::new());
                    }
                    b"host" => {
                        self.check_single(host.is_some(), "host")?;
                        self.parse_attrs(&e, "host", &[])?;
                        host = Some(String::new());
                    }
                    b"comment" => {
                        self.check_single(comment.is_some(), "comment")?;
                        self.parse_attrs(&e, "comment", &[])?;
                        comment = Some(String::new());
                    }
                    other => {
                        return Err(self.error(format!(
                            "unexpected element <{}>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Event::End(_) => break,
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content in snapshot")),
            }
        }

        // Only whitespace and comments may follow the root element
        loop {
            match self.next_event()? {
                Event::Eof => break,
                Event::Comment(_) => continue,
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.error(format!("bad character data: {e}")))?;
                    if !text.trim().is_empty() {
                        return Err(self.error("unexpected content after root element"));
                    }
                }
                _ => return Err(self.error("unexpected content after root element")),
            }
        }

        let info = SnapshotInfo {
            time: time.ok_or_else(|| self.error("missing <captured> element"))?,
            user: user.ok_or_else(|| self.error("missing <user> element"))?,
            host: host.ok_or_else(|| self.error("missing <host> element"))?,
            comment,
            digests: digests.ok_or_else(|| self.error("missing <digests> manifest"))?,
        };
        let tree = tree.ok_or_else(|| self.error("missing <dir> tree"))?;
        debug!(
            "read snapshot of {:?} captured {} by {}@{}",
            tree.name, info.time, info.user, info.host
        );
        Ok((tree, info))
    }

    fn parse_digest_manifest(&mut self) -> Result<Vec<DigestKind>> {
        let mut kinds = Vec::new();
        loop {
            match self.next_element_event()? {
                Event::Empty(e) if e.name().as_ref() == b"digest" => {
                    let mut attrs = self.parse_attrs(&e, "digest", &["type"])?;
                    let token = self.required_attr(&mut attrs, "type", "digest")?;
                    let kind = DigestKind::parse(&token)
                        .map_err(|_| self.error(format!("unknown digest type {token:?}")))?;
                    if kinds.contains(&kind) {
                        return Err(self.error(format!("duplicate digest type {token:?}")));
                    }
                    kinds.push(kind);
                }
                Event::End(_) => return Ok(kinds),
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content in <digests>")),
            }
        }
    }

    fn parse_dir_name(&self, start: &BytesStart, top_level: bool) -> Result<String> {
        let mut attrs = self.parse_attrs(start, "dir", &["name"])?;
        let raw = self.required_attr(&mut attrs, "name", "dir")?;
        let name = decode_name(&raw).map_err(|msg| self.error(msg))?;
        // Only the tree root may be nameless
        if name.is_empty() && !top_level {
            return Err(self.error("empty directory name"));
        }
        Ok(name)
    }

    fn parse_dir(
        &mut self,
        start: &BytesStart,
        top_level: bool,
        manifest: &[DigestKind],
    ) -> Result<DirNode> {
        let mut node = DirNode::new(self.parse_dir_name(start, top_level)?);
        let mut seen_dirs = false;
        let mut seen_files = false;

        loop {
            match self.next_element_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"dirs" if !seen_dirs && !seen_files => {
                        seen_dirs = true;
                        self.parse_attrs(&e, "dirs", &[])?;
                        self.parse_dirs_section(&mut node, manifest)?;
                    }
                    b"files" if !seen_files => {
                        seen_files = true;
                        self.parse_attrs(&e, "files", &[])?;
                        self.parse_files_section(&mut node, manifest)?;
                    }
                    other => {
                        return Err(self.error(format!(
                            "unexpected element <{}> in <dir>",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Event::End(_) => break,
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content in <dir>")),
            }
        }

        if let Err(e) = node.check_unique_child_names() {
            return Err(self.error(e.to_string()));
        }
        Ok(node)
    }

    fn parse_dirs_section(&mut self, node: &mut DirNode, manifest: &[DigestKind]) -> Result<()> {
        loop {
            match self.next_element_event()? {
                Event::Start(e) if e.name().as_ref() == b"dir" => {
                    node.dirs.push(self.parse_dir(&e, false, manifest)?);
                }
                Event::Empty(e) if e.name().as_ref() == b"dir" => {
                    node.dirs.push(DirNode::new(self.parse_dir_name(&e, false)?));
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content in <dirs>")),
            }
        }
    }

    fn parse_files_section(&mut self, node: &mut DirNode, manifest: &[DigestKind]) -> Result<()> {
        loop {
            match self.next_element_event()? {
                Event::Start(e) if e.name().as_ref() == b"file" => {
                    node.files.push(self.parse_file(&e, true, manifest)?);
                }
                Event::Empty(e) if e.name().as_ref() == b"file" => {
                    node.files.push(self.parse_file(&e, false, manifest)?);
                }
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error("unexpected content in <files>")),
            }
        }
    }

    fn parse_file(
        &mut self,
        start: &BytesStart,
        has_children: bool,
        manifest: &[DigestKind],
    ) -> Result<Leaf> {
        let mut attrs =
            self.parse_attrs(start, "file", &["name", "size", "time", "text", "type"])?;
        let raw_name = self.required_attr(&mut attrs, "name", "file")?;
        let name = decode_name(&raw_name).map_err(|msg| self.error(msg))?;
        if name.is_empty() {
            return Err(self.error("empty file name"));
        }
        let raw_size = self.required_attr(&mut attrs, "size", "file")?;
        let size: u64 = raw_size
            .parse()
            .map_err(|_| self.error(format!("invalid size {raw_size:?}")))?;
        let raw_time = self.required_attr(&mut attrs, "time", "file")?;
        let time = parse_time(&raw_time).map_err(|msg| self.error(msg))?;
        let text = match self.required_attr(&mut attrs, "text", "file")?.as_str() {
            "yes" => true,
            "no" => false,
            other => return Err(self.error(format!("invalid text flag {other:?}"))),
        };
        let kind_token = self.required_attr(&mut attrs, "type", "file")?;

        let mut crc32 = None;
        let mut md5 = None;
        let mut target: Option<String> = None;

        if has_children {
            loop {
                match self.next_element_event()? {
                    Event::Start(e) => match e.name().as_ref() {
                        b"digest" => {
                            if kind_token != "regfile" {
                                return Err(self.error(format!(
                                    "<digest> not allowed under a {kind_token} entry"
                                )));
                            }
                            self.parse_file_digest(&e, manifest, &mut crc32, &mut md5)?;
                        }
                        b"target" => {
                            if kind_token != "symlink" {
                                return Err(self.error(format!(
                                    "<target> not allowed under a {kind_token} entry"
                                )));
                            }
                            if target.is_some() {
                                return Err(self.error("duplicate <target> element"));
                            }
                            self.parse_attrs(&e, "target", &[])?;
                            target = Some(self.read_element_text("target")?);
                        }
                        other => {
                            return Err(self.error(format!(
                                "unexpected element <{}> in <file>",
                                String::from_utf8_lossy(other)
                            )))
                        }
                    },
                    Event::Empty(e) if e.name().as_ref() == b"target" => {
                        if kind_token != "symlink" {
                            return Err(self
                                .error(format!("<target> not allowed under a {kind_token} entry")));
                        }
                        if target.is_some() {
                            return Err(self.error("duplicate <target> element"));
                        }
                        self.parse_attrs(&e, "target", &[])?;
                        target = Some(String::new());
                    }
                    Event::End(_) => break,
                    Event::Eof => return Err(self.error("unexpected end of document")),
                    _ => return Err(self.error("unexpected content in <file>")),
                }
            }
        }

        match kind_token.as_str() {
            "regfile" => {
                for kind in manifest {
                    let present = match kind {
                        DigestKind::Crc32 => crc32.is_some(),
                        DigestKind::Md5 => md5.is_some(),
                    };
                    if !present {
                        return Err(self.error(format!(
                            "file {name:?} is missing its {} digest",
                            kind.as_str()
                        )));
                    }
                }
                let leaf = Leaf::regular(name, size, time, ContentSource::Captured { crc32, md5 });
                leaf.memoize_is_text(text);
                Ok(leaf)
            }
            "symlink" => {
                let target = target.ok_or_else(|| self.error("symlink entry missing <target>"))?;
                if target.len() as u64 != size {
                    return Err(self.error(format!(
                        "symlink size {size} does not match target length {}",
                        target.len()
                    )));
                }
                let leaf = Leaf::symlink(name, time, target);
                leaf.memoize_is_text(text);
                Ok(leaf)
            }
            "special" => Ok(Leaf::special(name, size, time)),
            other => Err(self.error(format!("unknown file type {other:?}"))),
        }
    }

    fn parse_file_digest(
        &mut self,
        start: &BytesStart,
        manifest: &[DigestKind],
        crc32: &mut Option<u32>,
        md5: &mut Option<[u8; 16]>,
    ) -> Result<()> {
        let mut attrs = self.parse_attrs(start, "digest", &["type"])?;
        let token = self.required_attr(&mut attrs, "type", "digest")?;
        let kind = DigestKind::parse(&token)
            .map_err(|_| self.error(format!("unknown digest type {token:?}")))?;
        if !manifest.contains(&kind) {
            return Err(self.error(format!("digest {token:?} is not declared in the manifest")));
        }
        let hex_text = self.read_element_text("digest")?;
        let bytes = hex::decode(hex_text.trim())
            .map_err(|e| self.error(format!("invalid {token} digest: {e}")))?;
        if bytes.len() != kind.digest_len() {
            return Err(self.error(format!(
                "{token} digest must be {} bytes, got {}",
                kind.digest_len(),
                bytes.len()
            )));
        }
        match kind {
            DigestKind::Crc32 => {
                if crc32.is_some() {
                    return Err(self.error("duplicate crc32 digest"));
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&bytes);
                *crc32 = Some(u32::from_be_bytes(raw));
            }
            DigestKind::Md5 => {
                if md5.is_some() {
                    return Err(self.error("duplicate md5 digest"));
                }
                let mut raw = [0u8; 16];
                raw.copy_from_slice(&bytes);
                *md5 = Some(raw);
            }
        }
        Ok(())
    }

    /// Collect the text content of the current element up to its end tag.
    fn read_element_text(&mut self, element: &str) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.next_event()? {
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| self.error(format!("bad text in <{element}>: {e}")))?;
                    out.push_str(&text);
                }
                Event::Comment(_) => continue,
                Event::End(_) => return Ok(out),
                Event::Eof => return Err(self.error("unexpected end of document")),
                _ => return Err(self.error(format!("unexpected content in <{element}>"))),
            }
        }
    }

    fn parse_attrs(
        &self,
        start: &BytesStart,
        element: &str,
        allowed: &[&str],
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for attr in start.attributes() {
            let attr =
                attr.map_err(|e| self.error(format!("malformed attribute on <{element}>: {e}")))?;
            let key = match std::str::from_utf8(attr.key.as_ref()) {
                Ok(key) => key.to_string(),
                Err(_) => return Err(self.error(format!("non-UTF-8 attribute on <{element}>"))),
            };
            if !allowed.contains(&key.as_str()) {
                return Err(self.error(format!("unexpected attribute {key:?} on <{element}>")));
            }
            let value = attr
                .unescape_value()
                .map_err(|e| self.error(format!("bad value for {key:?} on <{element}>: {e}")))?
                .into_owned();
            if out.insert(key.clone(), value).is_some() {
                return Err(self.error(format!("duplicate attribute {key:?} on <{element}>")));
            }
        }
        Ok(out)
    }

    fn required_attr(
        &self,
        attrs: &mut HashMap<String, String>,
        key: &str,
        element: &str,
    ) -> Result<String> {
        attrs
            .remove(key)
            .ok_or_else(|| self.error(format!("missing attribute {key:?} on <{element}>")))
    }

    fn check_single(&self, already_seen: bool, element: &str) -> Result<()> {
        if already_seen {
            return Err(self.error(format!("duplicate <{element}> element")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileKind;
    use crate::snapshot::{CaptureInfo, SnapshotWriter};
    use chrono::{TimeZone, Utc};

    fn stamp() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().unwrap()
    }

    fn sample_tree() -> DirNode {
        let mut root = DirNode::new("root");
        root.files.push(Leaf::regular(
            "a.txt",
            6,
            stamp(),
            ContentSource::Memory(b"hello\n".to_vec()),
        ));
        root.files
            .push(Leaf::regular("50%", 3, stamp(), ContentSource::Memory(b"\x00\x01\x02".to_vec())));
        root.files.push(Leaf::symlink("link", stamp(), "a.txt"));
        root.files.push(Leaf::special("dev", 0, stamp()));
        let mut sub = DirNode::new("b+c");
        sub.files.push(Leaf::regular(
            "inner",
            2,
            stamp(),
            ContentSource::Memory(b"hi".to_vec()),
        ));
        root.dirs.push(sub);
        root.dirs.push(DirNode::new("empty"));
        root.sort_recursive();
        root
    }

    fn capture() -> CaptureInfo {
        CaptureInfo {
            time: stamp(),
            user: "alice".to_string(),
            host: "buildbox".to_string(),
            comment: Some("before upgrade".to_string()),
        }
    }

    fn write_to_string(tree: &DirNode, digests: Vec<DigestKind>) -> String {
        let mut out = Vec::new();
        SnapshotWriter::new(digests)
            .write(tree, &capture(), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
        <!DOCTYPE tree-snapshot>\n\
        <tree-snapshot version=\"1\">\n\
        <captured>2026-01-02T03:04:05.000Z</captured>\n\
        <user>alice</user>\n\
        <host>buildbox</host>\n\
        <digests><digest type=\"crc32\"/></digests>\n";

    fn doc(body: &str) -> String {
        format!("{HEADER}{body}</tree-snapshot>")
    }

    fn expect_reject(source: &str, needle: &str) {
        let err = read_snapshot(source.as_bytes()).unwrap_err();
        match err {
            TreeDiffError::Snapshot { message, .. } => {
                assert!(
                    message.contains(needle),
                    "expected {needle:?} in {message:?}"
                );
            }
            other => panic!("expected snapshot error, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_preserves_tree_and_metadata() {
        let tree = sample_tree();
        let xml = write_to_string(&tree, vec![DigestKind::Crc32, DigestKind::Md5]);

        let (read, info) = read_snapshot(xml.as_bytes()).unwrap();
        assert_eq!(info.time, stamp());
        assert_eq!(info.user, "alice");
        assert_eq!(info.host, "buildbox");
        assert_eq!(info.comment.as_deref(), Some("before upgrade"));
        assert_eq!(info.digests, vec![DigestKind::Crc32, DigestKind::Md5]);

        assert_eq!(read.name, "root");
        assert_eq!(read.dirs.len(), 2);
        assert_eq!(read.files.len(), 4);
        assert!(read.dir("empty").unwrap().is_empty());
        assert_eq!(read.dir("b+c").unwrap().files[0].name, "inner");

        let original = tree.file("a.txt").unwrap();
        let restored = read.file("a.txt").unwrap();
        assert_eq!(restored.size, 6);
        assert_eq!(restored.mtime, stamp());
        assert_eq!(restored.kind, FileKind::Regular);
        assert!(restored.is_text().unwrap());
        assert_eq!(restored.crc32().unwrap(), original.crc32().unwrap());
        assert_eq!(restored.md5().unwrap(), original.md5().unwrap());

        assert!(!read.file("50%").unwrap().is_text().unwrap());

        let link = read.file("link").unwrap();
        assert_eq!(link.kind, FileKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("a.txt"));
        assert_eq!(link.size, 5);

        let dev = read.file("dev").unwrap();
        assert_eq!(dev.kind, FileKind::Special);
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let tree = sample_tree();
        let first = write_to_string(&tree, vec![DigestKind::Crc32, DigestKind::Md5]);
        let (read, _) = read_snapshot(first.as_bytes()).unwrap();
        let second = write_to_string(&read, vec![DigestKind::Crc32, DigestKind::Md5]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_digest_free_snapshot() {
        let tree = sample_tree();
        let xml = write_to_string(&tree, Vec::new());
        let (read, info) = read_snapshot(xml.as_bytes()).unwrap();
        assert!(info.digests.is_empty());
        assert!(read.file("a.txt").unwrap().crc32().is_err());
    }

    #[test]
    fn test_minimal_document() {
        let xml = doc("<dir name=\"\"/>\n");
        let (tree, info) = read_snapshot(xml.as_bytes()).unwrap();
        assert_eq!(tree.name, "");
        assert!(tree.is_empty());
        assert!(info.comment.is_none());
        assert_eq!(info.digests, vec![DigestKind::Crc32]);
    }

    #[test]
    fn test_rejects_wrong_root_and_version() {
        expect_reject("<inventory/>", "expected <tree-snapshot>");
        expect_reject(
            "<tree-snapshot version=\"2\"></tree-snapshot>",
            "unsupported snapshot version",
        );
        expect_reject(
            "<tree-snapshot version=\"1\" extra=\"x\"></tree-snapshot>",
            "unexpected attribute",
        );
    }

    #[test]
    fn test_rejects_missing_sections() {
        expect_reject(
            "<tree-snapshot version=\"1\"></tree-snapshot>",
            "missing <captured>",
        );
        let no_manifest = "<tree-snapshot version=\"1\">\
            <captured>2026-01-02T03:04:05.000Z</captured>\
            <user>u</user><host>h</host>\
            <dir name=\"\"/></tree-snapshot>";
        expect_reject(no_manifest, "<digests> must precede the tree");
        expect_reject(&doc(""), "missing <dir>");
    }

    #[test]
    fn test_rejects_duplicate_metadata() {
        let source = format!(
            "{}<comment>a</comment><comment>b</comment><dir name=\"\"/></tree-snapshot>",
            HEADER
        );
        expect_reject(&source, "duplicate <comment>");
    }

    #[test]
    fn test_rejects_unknown_elements_and_text() {
        expect_reject(&doc("<dir name=\"\"><junk/></dir>"), "unexpected element");
        expect_reject(&doc("<dir name=\"\">stray</dir>"), "unexpected text");
        let trailing = format!("{HEADER}<dir name=\"\"/></tree-snapshot>junk");
        expect_reject(&trailing, "after root element");
    }

    #[test]
    fn test_rejects_bad_file_attributes() {
        let file = |attrs: &str| doc(&format!("<dir name=\"\"><files><file {attrs}/></files></dir>"));
        expect_reject(
            &file("name=\"f\" size=\"big\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\""),
            "invalid size",
        );
        expect_reject(
            &file("name=\"f\" size=\"1\" time=\"yesterday\" text=\"no\" type=\"special\""),
            "invalid timestamp",
        );
        expect_reject(
            &file("name=\"f\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"maybe\" type=\"special\""),
            "invalid text flag",
        );
        expect_reject(
            &file("name=\"f\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"door\""),
            "unknown file type",
        );
        expect_reject(
            &file("name=\"\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\""),
            "empty file name",
        );
        expect_reject(
            &file("name=\"f\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\""),
            "missing attribute \"type\"",
        );
    }

    #[test]
    fn test_rejects_bad_digests() {
        let file = |digest: &str| {
            doc(&format!(
                "<dir name=\"\"><files>\
                 <file name=\"f\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"regfile\">\
                 {digest}</file></files></dir>"
            ))
        };
        expect_reject(&file("<digest type=\"crc32\">xyz</digest>"), "invalid crc32 digest");
        expect_reject(&file("<digest type=\"crc32\">abc</digest>"), "invalid crc32 digest");
        expect_reject(&file("<digest type=\"crc32\">aabbcc</digest>"), "must be 4 bytes");
        expect_reject(&file("<digest type=\"md5\">00ff</digest>"), "not declared in the manifest");
        expect_reject(&file("<digest type=\"sha1\">00</digest>"), "unknown digest type");
        expect_reject(
            &file("<digest type=\"crc32\">00000000</digest><digest type=\"crc32\">00000000</digest>"),
            "duplicate crc32",
        );
        expect_reject(&file(""), "missing its crc32 digest");
    }

    #[test]
    fn test_rejects_bad_symlinks() {
        let file = |attrs: &str, children: &str| {
            doc(&format!(
                "<dir name=\"\"><files><file {attrs}>{children}</file></files></dir>"
            ))
        };
        expect_reject(
            &file(
                "name=\"l\" size=\"3\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"symlink\"",
                "",
            ),
            "missing <target>",
        );
        expect_reject(
            &file(
                "name=\"l\" size=\"9\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"symlink\"",
                "<target>abc</target>",
            ),
            "does not match target length",
        );
        expect_reject(
            &file(
                "name=\"l\" size=\"1\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\"",
                "<target>x</target>",
            ),
            "<target> not allowed",
        );
    }

    #[test]
    fn test_rejects_duplicate_names_after_decoding() {
        let body = "<dir name=\"\"><files>\
            <file name=\"a+b\" size=\"0\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\"/>\
            <file name=\"a%2Bb\" size=\"0\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\"/>\
            </files></dir>";
        expect_reject(&doc(body), "duplicate entry name");

        // Case variants are distinct entries, not duplicates
        let ok = "<dir name=\"\"><files>\
            <file name=\"aa\" size=\"0\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\"/>\
            <file name=\"Aa\" size=\"0\" time=\"2026-01-02T03:04:05.000Z\" text=\"no\" type=\"special\"/>\
            </files></dir>";
        let (tree, _) = read_snapshot(doc(ok).as_bytes()).unwrap();
        assert_eq!(tree.files.len(), 2);
    }

    #[test]
    fn test_rejects_misordered_sections() {
        let body = "<dir name=\"\">\
            <files></files>\
            <dirs></dirs>\
            </dir>";
        expect_reject(&doc(body), "unexpected element <dirs>");
    }

    #[test]
    fn test_rejects_truncated_document() {
        // Either our own EOF detection or the XML parser's unclosed-tag
        // error fires, depending on where the input stops
        let err = read_snapshot(&b"<tree-snapshot version=\"1\"><captured>"[..]).unwrap_err();
        assert!(matches!(err, TreeDiffError::Snapshot { .. }));
        let err = read_snapshot(&b"<tree-snapshot version=\"1\">"[..]).unwrap_err();
        assert!(matches!(err, TreeDiffError::Snapshot { .. }));
    }

    #[test]
    fn test_error_carries_location() {
        let source = doc("<dir name=\"\"><junk/></dir>");
        match read_snapshot(source.as_bytes()).unwrap_err() {
            TreeDiffError::Snapshot { line, column, .. } => {
                // The offending element sits on the last header line + 1
                assert!(line >= 8, "line was {line}");
                assert!(column > 1);
            }
            other => panic!("expected snapshot error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut bytes = doc("<dir name=\"\"/>").into_bytes();
        bytes.push(0xff);
        let err = read_snapshot(&bytes[..]).unwrap_err();
        assert!(matches!(err, TreeDiffError::Snapshot { line: 1, .. }));
    }
}
