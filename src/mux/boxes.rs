//! ISO-BMFF box writing helpers
//!
//! Boxes are written in place: the size field is reserved up front and
//! patched once the body closure returns.

use bytes::{BufMut, BytesMut};

/// Identity transformation matrix used by `mvhd` and `tkhd`
pub(crate) const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Write a plain box
pub(crate) fn write_box<F>(buf: &mut BytesMut, kind: &[u8; 4], body: F)
where
    F: FnOnce(&mut BytesMut),
{
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Write a full box (version + 24-bit flags header)
pub(crate) fn write_full_box<F>(
    buf: &mut BytesMut,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
)
where
    F: FnOnce(&mut BytesMut),
{
    write_box(buf, kind, |buf| {
        buf.put_u8(version);
        buf.put_uint(u64::from(flags & 0x00FF_FFFF), 3);
        body(buf);
    })
}

/// Write an MPEG-4 descriptor (ISO 14496-1) with a four-byte expandable length
pub(crate) fn write_descriptor<F>(buf: &mut BytesMut, tag: u8, body: F)
where
    F: FnOnce(&mut BytesMut),
{
    let mut inner = BytesMut::new();
    body(&mut inner);
    let len = inner.len() as u32;

    buf.put_u8(tag);
    buf.put_u8(((len >> 21) & 0x7F) as u8 | 0x80);
    buf.put_u8(((len >> 14) & 0x7F) as u8 | 0x80);
    buf.put_u8(((len >> 7) & 0x7F) as u8 | 0x80);
    buf.put_u8((len & 0x7F) as u8);
    buf.put_slice(&inner);
}

pub(crate) fn write_matrix(buf: &mut BytesMut) {
    for value in UNITY_MATRIX {
        buf.put_u32(value);
    }
}

/// Walk the top-level boxes of a buffer, yielding `(type, body)`
///
/// Stops at the first truncated or malformed header.
pub fn iter_boxes(data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    let mut offset = 0usize;
    std::iter::from_fn(move || {
        if offset + 8 > data.len() {
            return None;
        }
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        if size < 8 || offset + size > data.len() {
            return None;
        }
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&data[offset + 4..offset + 8]);
        let body = &data[offset + 8..offset + size];
        offset += size;
        Some((kind, body))
    })
}

/// Find a child box by type among the top-level boxes of `data`
pub fn find_box<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    iter_boxes(data).find(|(k, _)| k == kind).map(|(_, body)| body)
}
