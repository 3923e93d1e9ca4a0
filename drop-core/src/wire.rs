//! Framing: one JSON metadata line per entry, the 3-byte ack, and raw compressed payloads.

use crate::protocol::ObjectMetadata;

/// Acknowledgment sent by the receiver after every metadata line.
pub const ACK: &[u8; 3] = b"OK\n";
/// Upper bound on a single metadata line, newline included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Encode metadata into a single newline-terminated line.
pub fn encode_metadata(meta: &ObjectMetadata) -> Result<Vec<u8>, MetadataEncodeError> {
    let mut line = serde_json::to_vec(meta).map_err(MetadataEncodeError::Encode)?;
    // serde_json escapes control characters, so a raw newline here means a broken encoder.
    if line.contains(&b'\n') {
        return Err(MetadataEncodeError::EmbeddedNewline);
    }
    if line.len() + 1 > MAX_LINE_LEN {
        return Err(MetadataEncodeError::TooLarge);
    }
    line.push(b'\n');
    Ok(line)
}

/// Error encoding a metadata line.
#[derive(Debug, thiserror::Error)]
pub enum MetadataEncodeError {
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("metadata line contains a newline")]
    EmbeddedNewline,
    #[error("metadata line too large")]
    TooLarge,
}

/// Decode one metadata line. A trailing `\n` (or `\r\n`) is accepted.
pub fn decode_metadata(line: &[u8]) -> Result<ObjectMetadata, MetadataDecodeError> {
    if line.len() > MAX_LINE_LEN {
        return Err(MetadataDecodeError::TooLarge);
    }
    let body = line.strip_suffix(b"\n").unwrap_or(line);
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(MetadataDecodeError::Empty);
    }
    serde_json::from_slice(body).map_err(MetadataDecodeError::Decode)
}

/// Error decoding a metadata line (empty, too large, or not a valid envelope).
#[derive(Debug, thiserror::Error)]
pub enum MetadataDecodeError {
    #[error("empty metadata line")]
    Empty,
    #[error("metadata line too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// True only for the exact 3-byte ack.
pub fn is_ack(buf: &[u8]) -> bool {
    buf == ACK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ObjectKind;

    #[test]
    fn file_entry_line_shape() {
        let meta = ObjectMetadata::file_entry("sub/b.txt", 42, "abcd");
        let line = encode_metadata(&meta).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(
            std::str::from_utf8(&line).unwrap(),
            "{\"type\":\"file\",\"path\":\"sub/b.txt\",\"size\":42,\"checksum\":\"abcd\"}\n"
        );
        assert_eq!(decode_metadata(&line).unwrap(), meta);
    }

    #[test]
    fn omitted_fields_decode_as_none() {
        let meta = decode_metadata(b"{\"type\":\"dir\",\"path\":\"sub\"}\n").unwrap();
        assert_eq!(meta.kind, ObjectKind::Dir);
        assert_eq!(meta.path.as_deref(), Some("sub"));
        assert!(meta.filename.is_none() && meta.size.is_none() && meta.checksum.is_none());
    }

    #[test]
    fn newline_in_name_stays_escaped() {
        let meta = ObjectMetadata::root(ObjectKind::File, "evil\nname");
        let line = encode_metadata(&meta).unwrap();
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(decode_metadata(&line).unwrap().filename.as_deref(), Some("evil\nname"));
    }

    #[test]
    fn decode_rejects_bad_lines() {
        assert!(matches!(decode_metadata(b"\n"), Err(MetadataDecodeError::Empty)));
        assert!(matches!(
            decode_metadata(b"{\"type\":\"socket\"}\n"),
            Err(MetadataDecodeError::Decode(_))
        ));
        assert!(matches!(
            decode_metadata(b"not json\n"),
            Err(MetadataDecodeError::Decode(_))
        ));
        let huge = vec![b' '; MAX_LINE_LEN + 1];
        assert!(matches!(decode_metadata(&huge), Err(MetadataDecodeError::TooLarge)));
    }

    #[test]
    fn ack_is_exact() {
        assert!(is_ack(b"OK\n"));
        assert!(!is_ack(b"OK"));
        assert!(!is_ack(b"NO\n"));
        assert!(!is_ack(b"ok\n"));
    }
}
