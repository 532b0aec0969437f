use super::{encode_name, format_time, CaptureInfo, DigestKind, FORMAT_VERSION, ROOT_ELEMENT};
use crate::node::{DirNode, FileKind, Leaf};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;
use tracing::debug;
use treediff_common::Result;

/// Serializes a directory tree to the XML snapshot format.
///
/// Digests not yet memoized on a leaf are computed during the write, which
/// streams each file once per missing digest. Writing a tree that was itself
/// read from a snapshot reuses the recorded values and touches no file
/// content.
pub struct SnapshotWriter {
    digests: Vec<DigestKind>,
}

impl SnapshotWriter {
    pub fn new(mut digests: Vec<DigestKind>) -> Self {
        digests.sort();
        digests.dedup();
        Self { digests }
    }

    pub fn write<W: Write>(&self, tree: &DirNode, info: &CaptureInfo, out: W) -> Result<()> {
        debug!(
            "writing snapshot of {:?} with digests {:?}",
            tree.name, self.digests
        );
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::new(ROOT_ELEMENT)))?;

        let mut root = BytesStart::new(ROOT_ELEMENT);
        root.push_attribute(("version", FORMAT_VERSION));
        writer.write_event(Event::Start(root))?;

        self.write_text_element(&mut writer, "captured", &format_time(info.time))?;
        self.write_text_element(&mut writer, "user", &info.user)?;
        self.write_text_element(&mut writer, "host", &info.host)?;
        if let Some(comment) = &info.comment {
            self.write_text_element(&mut writer, "comment", comment)?;
        }

        if self.digests.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new("digests")))?;
        } else {
            writer.write_event(Event::Start(BytesStart::new("digests")))?;
            for kind in &self.digests {
                let mut elem = BytesStart::new("digest");
                elem.push_attribute(("type", kind.as_str()));
                writer.write_event(Event::Empty(elem))?;
            }
            writer.write_event(Event::End(BytesEnd::new("digests")))?;
        }

        self.write_dir(&mut writer, tree)?;

        writer.write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))?;
        Ok(())
    }

    fn write_text_element<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        text: &str,
    ) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(text)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn write_dir<W: Write>(&self, writer: &mut Writer<W>, dir: &DirNode) -> Result<()> {
        dir.check_unique_child_names()?;

        let mut start = BytesStart::new("dir");
        start.push_attribute(("name", encode_name(&dir.name).as_ref()));

        if dir.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;

        if !dir.dirs.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("dirs")))?;
            for sub in &dir.dirs {
                self.write_dir(writer, sub)?;
            }
            writer.write_event(Event::End(BytesEnd::new("dirs")))?;
        }

        if !dir.files.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("files")))?;
            for file in &dir.files {
                self.write_file(writer, file)?;
            }
            writer.write_event(Event::End(BytesEnd::new("files")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("dir")))?;
        Ok(())
    }

    fn write_file<W: Write>(&self, writer: &mut Writer<W>, file: &Leaf) -> Result<()> {
        let kind_token = match file.kind {
            FileKind::Regular => "regfile",
            FileKind::Symlink => "symlink",
            FileKind::Special => "special",
        };
        let mut start = BytesStart::new("file");
        start.push_attribute(("name", encode_name(&file.name).as_ref()));
        start.push_attribute(("size", file.size.to_string().as_str()));
        start.push_attribute(("time", format_time(file.mtime).as_str()));
        start.push_attribute(("text", if file.is_text()? { "yes" } else { "no" }));
        start.push_attribute(("type", kind_token));

        match file.kind {
            FileKind::Regular if !self.digests.is_empty() => {
                writer.write_event(Event::Start(start))?;
                for kind in &self.digests {
                    let value = match kind {
                        DigestKind::Crc32 => format!("{:08x}", file.crc32()?),
                        DigestKind::Md5 => hex::encode(file.md5()?),
                    };
                    let mut elem = BytesStart::new("digest");
                    elem.push_attribute(("type", kind.as_str()));
                    writer.write_event(Event::Start(elem))?;
                    writer.write_event(Event::Text(BytesText::new(&value)))?;
                    writer.write_event(Event::End(BytesEnd::new("digest")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("file")))?;
            }
            FileKind::Symlink => {
                let target = file.link_target.as_deref().unwrap_or("");
                writer.write_event(Event::Start(start))?;
                self.write_text_element(writer, "target", target)?;
                writer.write_event(Event::End(BytesEnd::new("file")))?;
            }
            // Digest-less regular files and specials carry no children
            _ => writer.write_event(Event::Empty(start))?,
        }
        Ok(())
    }
}
