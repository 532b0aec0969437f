use crate::node::Leaf;
use std::io::Read;
use tracing::debug;
use treediff_common::{Result, TreeDiffError};

/// Available content-comparison methods, cheapest-feasible wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentMethod {
    RawBytes,
    TextNormalized,
    Crc32,
    Md5,
}

impl ContentMethod {
    pub const ALL: [ContentMethod; 4] = [
        ContentMethod::RawBytes,
        ContentMethod::TextNormalized,
        ContentMethod::Crc32,
        ContentMethod::Md5,
    ];

    /// Fixed tie-break order for equal combined costs: digests first (they
    /// are typically memoized), then the normalized text comparison, then
    /// the raw byte comparison.
    fn preference(self) -> u8 {
        match self {
            ContentMethod::Crc32 => 0,
            ContentMethod::Md5 => 1,
            ContentMethod::TextNormalized => 2,
            ContentMethod::RawBytes => 3,
        }
    }
}

/// Relative expense a leaf reports per method. `NotSet` is an uninitialized
/// sentinel distinct from `Impossible`; neither is eligible for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cost {
    NotSet,
    Easy,
    Moderate,
    Hard,
    VeryHard,
    Impossible,
}

/// Pick the cheapest mutually-available method for a file pair.
///
/// Combined cost per method is the worse of the two sides; methods
/// impossible or unset on either side are excluded, and the normalized
/// text comparison additionally requires `allow_text` and both files
/// sniffing as text.
pub fn select_method(a: &Leaf, b: &Leaf, allow_text: bool) -> Result<ContentMethod> {
    let text_ok = allow_text && a.is_text()? && b.is_text()?;

    let mut best: Option<(Cost, u8, ContentMethod)> = None;
    for method in ContentMethod::ALL {
        if method == ContentMethod::TextNormalized && !text_ok {
            continue;
        }
        let cost_a = a.cost(method);
        let cost_b = b.cost(method);
        if matches!(cost_a, Cost::NotSet | Cost::Impossible)
            || matches!(cost_b, Cost::NotSet | Cost::Impossible)
        {
            continue;
        }
        let combined = cost_a.max(cost_b);
        let candidate = (combined, method.preference(), method);
        if best.map_or(true, |(cost, pref, _)| (combined, method.preference()) < (cost, pref)) {
            best = Some(candidate);
        }
    }

    match best {
        Some((cost, _, method)) => {
            debug!(
                "selected {:?} (cost {:?}) for {:?} vs {:?}",
                method, cost, a.name, b.name
            );
            Ok(method)
        }
        None => Err(TreeDiffError::NoComparableMethod {
            name: a.name.clone(),
        }),
    }
}

/// Decide content equality for a file pair using the cheapest mutually
/// available method.
pub fn compare_content(a: &Leaf, b: &Leaf, allow_text: bool) -> Result<bool> {
    match select_method(a, b, allow_text)? {
        ContentMethod::RawBytes => compare_raw(a, b),
        ContentMethod::TextNormalized => compare_text(a, b),
        // Digest equality is the sole criterion here; a size mismatch alone
        // does not short-circuit, since the recorded peer bytes may be gone.
        ContentMethod::Crc32 => Ok(a.crc32()? == b.crc32()?),
        ContentMethod::Md5 => Ok(a.md5()? == b.md5()?),
    }
}

/// Streamed byte-for-byte comparison; requires equal length.
fn compare_raw(a: &Leaf, b: &Leaf) -> Result<bool> {
    if a.size != b.size {
        return Ok(false);
    }

    let mut reader_a = a.open_reader()?;
    let mut reader_b = b.open_reader()?;
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];

    loop {
        let n_a = read_full(reader_a.as_mut(), &mut buf_a)?;
        let n_b = read_full(reader_b.as_mut(), &mut buf_b)?;
        if n_a != n_b || buf_a[..n_a] != buf_b[..n_b] {
            return Ok(false);
        }
        if n_a < buf_a.len() {
            // Both streams hit end of input at the same offset
            return Ok(true);
        }
    }
}

/// Line-terminator-insensitive text comparison.
fn compare_text(a: &Leaf, b: &Leaf) -> Result<bool> {
    let mut bytes_a = Vec::new();
    a.open_reader()?.read_to_end(&mut bytes_a)?;
    let mut bytes_b = Vec::new();
    b.open_reader()?.read_to_end(&mut bytes_b)?;

    Ok(normalize_text(&bytes_a) == normalize_text(&bytes_b))
}

/// Map `\r\n` and `\r` to `\n` and drop a single trailing EOF marker.
fn normalize_text(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' {
            out.push(b'\n');
            if bytes.get(i + 1) == Some(&b'\n') {
                i += 1;
            }
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    if out.last() == Some(&0x1a) {
        out.pop();
    }
    out
}

/// Text heuristic: no control bytes other than common whitespace and the
/// legacy EOF marker. An empty slice counts as text.
pub(crate) fn looks_like_text(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1a))
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContentSource;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    fn memory_leaf(name: &str, bytes: &[u8]) -> Leaf {
        Leaf::regular(name, bytes.len() as u64, epoch(), ContentSource::Memory(bytes.to_vec()))
    }

    fn captured_leaf(name: &str, size: u64, crc32: Option<u32>, md5: Option<[u8; 16]>) -> Leaf {
        Leaf::regular(name, size, epoch(), ContentSource::Captured { crc32, md5 })
    }

    #[test]
    fn test_raw_bytes_equal_and_different() {
        let a = memory_leaf("a", b"hello world");
        let b = memory_leaf("b", b"hello world");
        let c = memory_leaf("c", b"hello worlD");

        assert!(compare_content(&a, &b, false).unwrap());
        assert!(!compare_content(&a, &c, false).unwrap());
    }

    #[test]
    fn test_raw_bytes_length_mismatch() {
        let a = memory_leaf("a", b"abc");
        let b = memory_leaf("b", b"abcd");
        assert!(!compare_content(&a, &b, false).unwrap());
    }

    #[test]
    fn test_text_normalization_of_line_endings() {
        let a = memory_leaf("a", b"one\r\ntwo\r\nthree");
        let b = memory_leaf("b", b"one\ntwo\nthree");
        let c = memory_leaf("c", b"one\rtwo\rthree");

        // Different byte lengths, so raw comparison would say different;
        // text mode treats all three as equal.
        assert!(!compare_content(&a, &b, false).unwrap());
        assert!(compare_content(&a, &b, true).unwrap());
        assert!(compare_content(&b, &c, true).unwrap());
    }

    #[test]
    fn test_text_trailing_eof_marker_insignificant() {
        let a = memory_leaf("a", b"data\n\x1a");
        let b = memory_leaf("b", b"data\n");
        assert!(compare_content(&a, &b, true).unwrap());

        // Only a single trailing marker is dropped
        let c = memory_leaf("c", b"data\n\x1a\x1a");
        assert!(!compare_content(&b, &c, true).unwrap());
    }

    #[test]
    fn test_text_method_gated_by_binary_sniff() {
        let a = memory_leaf("a", b"bin\x00ary\r\n");
        let b = memory_leaf("b", b"bin\x00ary\n");
        // Binary content excludes the text method even when allowed
        assert!(!compare_content(&a, &b, true).unwrap());
    }

    #[test]
    fn test_digest_comparison_ignores_size_mismatch() {
        let digest = Some([7u8; 16]);
        let a = captured_leaf("a", 10, None, digest);
        let b = captured_leaf("b", 20, None, digest);
        // Sizes differ but the recorded digests agree
        assert!(compare_content(&a, &b, false).unwrap());
    }

    #[test]
    fn test_crc32_preferred_over_md5_on_cost_tie() {
        let a = captured_leaf("a", 4, Some(0xdead_beef), Some([1; 16]));
        let b = captured_leaf("b", 4, Some(0xdead_beef), Some([2; 16]));
        // Both digests are EASY on both sides; CRC32 wins the tie, so the
        // differing MD5 values must not be consulted.
        assert_eq!(select_method(&a, &b, false).unwrap(), ContentMethod::Crc32);
        assert!(compare_content(&a, &b, false).unwrap());
    }

    #[test]
    fn test_cheapest_method_never_touches_expensive_one() {
        // A lives at a path that does not exist, but its CRC32 is memoized:
        // CRC32 is EASY/EASY while MD5 would be HARD and raw bytes MODERATE
        // on A but require opening the missing file. Selecting anything but
        // CRC32 would error.
        let a = Leaf::regular(
            "a",
            4,
            epoch(),
            ContentSource::Disk(PathBuf::from("/nonexistent/treediff-test-a")),
        );
        a.memoize_crc32(0x1234_5678);
        a.memoize_is_text(false);

        let b = memory_leaf("b", b"abcd");
        b.memoize_crc32(0x1234_5678);

        assert_eq!(select_method(&a, &b, false).unwrap(), ContentMethod::Crc32);
        assert!(compare_content(&a, &b, false).unwrap());
    }

    #[test]
    fn test_no_comparable_method() {
        let a = captured_leaf("a", 4, Some(1), None);
        let b = captured_leaf("b", 4, None, Some([0; 16]));
        let err = compare_content(&a, &b, false).unwrap_err();
        assert!(matches!(err, TreeDiffError::NoComparableMethod { .. }));
    }

    #[test]
    fn test_symlink_targets_compare_as_bytes() {
        let a = Leaf::symlink("ln", epoch(), "target/path");
        let b = Leaf::symlink("ln", epoch(), "target/path");
        let c = Leaf::symlink("ln", epoch(), "other/path!");

        assert!(compare_content(&a, &b, false).unwrap());
        assert!(!compare_content(&a, &c, false).unwrap());
    }

    #[test]
    fn test_looks_like_text() {
        assert!(looks_like_text(b""));
        assert!(looks_like_text(b"plain text\twith\nnewlines\r\n"));
        assert!(looks_like_text(b"ends with eof marker\x1a"));
        assert!(!looks_like_text(b"nul\x00byte"));
        assert!(!looks_like_text(b"\x01\x02\x03"));
    }

    #[test]
    fn test_cost_ordering() {
        assert!(Cost::Easy < Cost::Moderate);
        assert!(Cost::Moderate < Cost::Hard);
        assert!(Cost::Hard < Cost::VeryHard);
        assert!(Cost::VeryHard < Cost::Impossible);
        assert_ne!(Cost::NotSet, Cost::Impossible);
    }
}
