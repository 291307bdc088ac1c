//! Locating a superfluous-cert tag inside a finished binary.

use crate::error::{TagError, TagResult};

/// DER prefix of the tag extension: the extension OID followed by an OCTET
/// STRING header with a two-byte length. Tags are kept at 256 bytes or more,
/// so the two-byte form is guaranteed.
///
/// `06 0b` — OID, 11 bytes; `04 82` — OCTET STRING, two-byte length.
const TAG_OID_SEARCH: [u8; 15] = [
    0x06, 0x0b, 0x2b, 0x06, 0x01, 0x04, 0x01, 0xd6, 0x79, 0x02, 0x01, 0xce, 0x0f, 0x04, 0x82,
];

/// Position of a located tag buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagLocation {
    /// Absolute offset of the tag payload in the searched buffer.
    pub offset: usize,
    /// Payload length, taken from the big-endian length field. ASN.1 DER is
    /// big-endian even though the surrounding file formats are not.
    pub length: usize,
}

/// Searches `contents` from `start` for the last occurrence of the tag
/// extension and returns the payload position, or `None` when no tag is
/// present. The caller should restrict the search to the certificate region
/// when it is known: an MSI can carry a tagged installer inside it, and only
/// the outermost container's tag counts.
pub fn find_tag(contents: &[u8], start: usize) -> TagResult<Option<TagLocation>> {
    let region = contents.get(start..).ok_or(TagError::Truncated)?;

    let Some(found) = region
        .windows(TAG_OID_SEARCH.len())
        .rposition(|window| window == TAG_OID_SEARCH)
    else {
        return Ok(None);
    };
    let length_offset = found + TAG_OID_SEARCH.len();
    if length_offset > region.len() - 2 {
        return Err(TagError::TagTooShort);
    }
    let length = usize::from(u16::from_be_bytes([
        region[length_offset],
        region[length_offset + 1],
    ]));
    let payload_offset = length_offset + 2;
    if payload_offset + length > region.len() {
        return Err(TagError::TagTooShort);
    }
    Ok(Some(TagLocation {
        offset: start + payload_offset,
        length,
    }))
}
