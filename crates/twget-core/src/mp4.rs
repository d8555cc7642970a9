//! Movie header (`mvhd`) timestamp patching for ISO base media files (MP4/MOV).

use std::fs;
use std::io::Cursor;
use std::path::Path;

use ::mp4::{BoxHeader, BoxType, MvhdBox, ReadBox, WriteBox};
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Seconds between 1904-01-01T00:00:00Z (the container epoch) and the Unix epoch.
pub const MP4_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Box header: 4-byte size + 4-byte type.
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone)]
struct BoxSpan {
    name: BoxType,
    start: usize,
    /// Offset of the box payload (after size, type and optional largesize)
    body: usize,
    /// Offset one past the end of the box
    end: usize,
}

impl BoxSpan {
    /// Size as `ReadBox::read_box` expects it: payload plus an 8-byte header,
    /// even when the box carries a largesize.
    fn read_size(&self) -> u64 {
        (self.end - self.body + HEADER_LEN) as u64
    }
}

/// Walk the sibling boxes in `buf[start..end]`.
fn children(buf: &[u8], start: usize, end: usize) -> std::result::Result<Vec<BoxSpan>, String> {
    let mut boxes = Vec::new();
    let mut pos = start;
    while pos < end {
        let mut cursor = Cursor::new(&buf[pos..end]);
        let header = BoxHeader::read(&mut cursor).map_err(|e| format!("bad box header at offset {pos}: {e}"))?;
        let header_len = cursor.position() as usize;
        let body = pos + header_len;
        // a largesize is reported without the 8 bytes it occupies itself
        let box_end = if header.size == 0 {
            Some(end)
        } else {
            usize::try_from(header.size)
                .ok()
                .and_then(|n| n.checked_add(header_len - HEADER_LEN))
                .filter(|&n| n >= header_len)
                .and_then(|n| pos.checked_add(n))
                .filter(|&e| e <= end)
        };
        let box_end = box_end.ok_or_else(|| {
            format!("box `{}` at offset {pos} has invalid size {}", header.name, header.size)
        })?;
        boxes.push(BoxSpan {
            name: header.name,
            start: pos,
            body,
            end: box_end,
        });
        pos = box_end;
    }
    Ok(boxes)
}

fn find_mvhd(buf: &[u8]) -> std::result::Result<BoxSpan, String> {
    let moov = children(buf, 0, buf.len())?
        .into_iter()
        .find(|b| b.name == BoxType::MoovBox)
        .ok_or("no `moov` box")?;
    children(buf, moov.body, moov.end)?
        .into_iter()
        .find(|b| b.name == BoxType::MvhdBox)
        .ok_or_else(|| "no `mvhd` box in `moov`".to_string())
}

fn read_mvhd(buf: &[u8], span: &BoxSpan) -> std::result::Result<MvhdBox, String> {
    let mut cursor = Cursor::new(&buf[span.start..span.end]);
    cursor.set_position((span.body - span.start) as u64);
    MvhdBox::read_box(&mut cursor, span.read_size()).map_err(|e| format!("unreadable `mvhd`: {e}"))
}

/// Seconds since the container epoch, truncated toward it.
pub fn mp4_seconds(ts: DateTime<Utc>) -> Option<u64> {
    u64::try_from(ts.timestamp().checked_add(MP4_EPOCH_OFFSET)?).ok()
}

/// Rewrite the creation and modification time of `moov/mvhd` in memory.
///
/// The header is re-serialized and must come out the same length as the
/// box it replaces; nothing outside it is touched.
pub fn patch_bytes(buf: &mut [u8], ts: DateTime<Utc>) -> std::result::Result<(), String> {
    let secs = mp4_seconds(ts).ok_or_else(|| format!("timestamp {ts} predates 1904"))?;

    let span = find_mvhd(buf)?;
    let mut mvhd = read_mvhd(buf, &span)?;
    if mvhd.version == 0 && secs > u64::from(u32::MAX) {
        return Err(format!("timestamp {ts} does not fit a version 0 `mvhd`"));
    }
    mvhd.creation_time = secs;
    mvhd.modification_time = secs;

    let mut out = Vec::with_capacity(span.end - span.start);
    mvhd.write_box(&mut out)
        .map_err(|e| format!("cannot serialize `mvhd`: {e}"))?;
    if out.len() != span.end - span.start {
        return Err(format!(
            "`mvhd` of {} bytes cannot be rewritten in place ({} bytes serialized)",
            span.end - span.start,
            out.len()
        ));
    }
    buf[span.start..span.end].copy_from_slice(&out);
    Ok(())
}

/// Patch the movie header of the file at `path` so its creation and
/// modification time equal `ts`, then write the whole file back in place.
///
/// If the write fails halfway the file is left truncated; the original bytes
/// are not kept anywhere else.
pub fn patch(path: &Path, ts: DateTime<Utc>) -> Result<()> {
    let mut buf = fs::read(path).map_err(|e| Error::io(path, e))?;
    patch_bytes(&mut buf, ts).map_err(|reason| Error::container(path, reason))?;
    fs::write(path, &buf).map_err(|e| Error::io(path, e))
}
