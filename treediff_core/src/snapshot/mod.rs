//! Persisted XML snapshot format: a directory tree plus selected content
//! digests, readable later without the original files being present.

mod reader;
mod writer;

pub use reader::read_snapshot;
pub use writer::SnapshotWriter;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::Read;
use treediff_common::{Result, TreeDiffError};

pub(crate) const ROOT_ELEMENT: &str = "tree-snapshot";
pub(crate) const FORMAT_VERSION: &str = "1";
pub(crate) const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Digest algorithms a snapshot can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestKind {
    Crc32,
    Md5,
}

impl DigestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DigestKind::Crc32 => "crc32",
            DigestKind::Md5 => "md5",
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "crc32" => Ok(DigestKind::Crc32),
            "md5" => Ok(DigestKind::Md5),
            other => Err(TreeDiffError::UnsupportedDigest(other.to_string())),
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            DigestKind::Crc32 => 4,
            DigestKind::Md5 => 16,
        }
    }
}

/// Free-form metadata recorded alongside a written tree.
#[derive(Debug, Clone)]
pub struct CaptureInfo {
    pub time: DateTime<Utc>,
    pub user: String,
    pub host: String,
    pub comment: Option<String>,
}

impl CaptureInfo {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            time: crate::node::truncate_to_millis(Utc::now()),
            user: user.into(),
            host: host.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Metadata recovered when reading a snapshot back.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub time: DateTime<Utc>,
    pub user: String,
    pub host: String,
    pub comment: Option<String>,
    /// Digests the snapshot declares for its regular files
    pub digests: Vec<DigestKind>,
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_time(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("invalid timestamp {text:?}: {e}"))
}

/// Percent-encode a path segment for use in a `name` attribute. Only the
/// reserved characters `%` and `+` trigger encoding; everything else passes
/// through verbatim.
pub(crate) fn encode_name(name: &str) -> Cow<'_, str> {
    if !name.contains(['%', '+']) {
        return Cow::Borrowed(name);
    }
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '+' => out.push_str("%2B"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

pub(crate) fn decode_name(encoded: &str) -> std::result::Result<String, String> {
    if !encoded.contains('%') {
        return Ok(encoded.to_string());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .ok_or_else(|| format!("truncated percent escape in name {encoded:?}"))?;
            let value = u8::from_str_radix(hex, 16)
                .map_err(|_| format!("invalid percent escape {hex:?} in name {encoded:?}"))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| format!("name {encoded:?} is not valid UTF-8 after decoding"))
}

/// Probe whether a byte stream looks like a tree snapshot, reading only far
/// enough to see the first element name. Undecodable or non-XML input is a
/// clean negative, never an error; I/O failures are propagated.
pub fn is_snapshot<R: Read>(mut input: R) -> Result<bool> {
    let mut buffer = [0u8; 1024];
    let mut len = 0;
    while len < buffer.len() {
        let n = input.read(&mut buffer[len..])?;
        if n == 0 {
            break;
        }
        len += n;
    }

    let text = match std::str::from_utf8(&buffer[..len]) {
        Ok(text) => text,
        // A multi-byte character may straddle the probe boundary
        Err(e) if e.valid_up_to() > 0 => {
            std::str::from_utf8(&buffer[..e.valid_up_to()]).unwrap_or("")
        }
        Err(_) => return Ok(false),
    };

    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::DocType(_)) | Ok(Event::Comment(_))
            | Ok(Event::PI(_)) => continue,
            Ok(Event::Text(t)) => match t.unescape() {
                Ok(text) if text.trim().is_empty() => continue,
                _ => return Ok(false),
            },
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(e.name().as_ref() == ROOT_ELEMENT.as_bytes());
            }
            Ok(_) | Err(_) => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_name_passthrough() {
        assert_eq!(encode_name("plain name.txt"), "plain name.txt");
        assert!(matches!(encode_name("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_encode_name_reserved_characters() {
        assert_eq!(encode_name("50%"), "50%25");
        assert_eq!(encode_name("a+b"), "a%2Bb");
        assert_eq!(encode_name("%+%"), "%25%2B%25");
    }

    #[test]
    fn test_decode_name_round_trip() {
        for name in ["plain", "50% off", "a+b+c", "%2B literal", "übersicht"] {
            let encoded = encode_name(name);
            assert_eq!(decode_name(&encoded).unwrap(), name);
        }
    }

    #[test]
    fn test_decode_name_rejects_bad_escapes() {
        assert!(decode_name("trailing%2").is_err());
        assert!(decode_name("bad%zz").is_err());
    }

    #[test]
    fn test_parse_time_round_trip() {
        let formatted = "2026-08-23T10:20:30.456Z";
        let time = parse_time(formatted).unwrap();
        assert_eq!(format_time(time), formatted);
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert!(parse_time("2026-08-23").is_err());
        assert!(parse_time("not a time").is_err());
    }

    #[test]
    fn test_digest_kind_tokens() {
        assert_eq!(DigestKind::parse("crc32").unwrap(), DigestKind::Crc32);
        assert_eq!(DigestKind::parse("md5").unwrap(), DigestKind::Md5);
        assert!(matches!(
            DigestKind::parse("sha1"),
            Err(TreeDiffError::UnsupportedDigest(_))
        ));
    }

    #[test]
    fn test_is_snapshot_accepts_snapshot_prologue() {
        let doc = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE tree-snapshot>\n<tree-snapshot version=\"1\">";
        assert!(is_snapshot(doc.as_bytes()).unwrap());
    }

    #[test]
    fn test_is_snapshot_rejects_other_xml() {
        let doc = "<?xml version=\"1.0\"?><inventory/>";
        assert!(!is_snapshot(doc.as_bytes()).unwrap());
    }

    #[test]
    fn test_is_snapshot_rejects_binary_and_text() {
        assert!(!is_snapshot(&b"\x00\x01\x02\xff\xfe binary"[..]).unwrap());
        assert!(!is_snapshot(&b"just some plain text"[..]).unwrap());
        assert!(!is_snapshot(&b""[..]).unwrap());
    }
}
