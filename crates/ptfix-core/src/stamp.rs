//! Writes a resolved timestamp back into an output file.
//!
//! JPEG files get a freshly built EXIF block holding only the capture time
//! (original + digitized) and, when known, the orientation. Any EXIF block
//! already in the file is dropped. Every file also gets its access and
//! modification times set, whether or not the EXIF write succeeded.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use filetime::FileTime;

use crate::date::exif::{read_exif_orientation, EXIF_DATETIME_FORMAT};
use crate::date::{epoch_to_local, xmp};
use crate::error::FileError;
use crate::media::MediaKind;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Build a TIFF-structured EXIF payload with just the date tags and orientation.
pub fn build_exif_block(local: NaiveDateTime, orientation: Option<u16>) -> Result<Vec<u8>, exif::Error> {
    let stamp = local.format(EXIF_DATETIME_FORMAT).to_string().into_bytes();
    let original = Field {
        tag: Tag::DateTimeOriginal,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![stamp.clone()]),
    };
    let digitized = Field {
        tag: Tag::DateTimeDigitized,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![stamp]),
    };
    let orientation = orientation.map(|o| Field {
        tag: Tag::Orientation,
        ifd_num: In::PRIMARY,
        value: Value::Short(vec![o]),
    });

    let mut writer = Writer::new();
    writer.push_field(&original);
    writer.push_field(&digitized);
    if let Some(field) = &orientation {
        writer.push_field(field);
    }
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, false)?;
    Ok(buf.into_inner())
}

fn exif_segment(tiff: &[u8]) -> Result<Vec<u8>, String> {
    let length = 2 + EXIF_HEADER.len() + tiff.len();
    let length = u16::try_from(length).map_err(|_| "EXIF block too large".to_string())?;
    let mut segment = Vec::with_capacity(length as usize + 2);
    segment.extend_from_slice(&[0xFF, APP1]);
    segment.extend_from_slice(&length.to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(tiff);
    Ok(segment)
}

/// Replace every EXIF APP1 segment of a JPEG stream with `tiff`.
///
/// The new segment goes right after SOI, or after a leading JFIF APP0.
/// Everything from SOS onward is copied verbatim.
pub fn splice_jpeg_exif(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, String> {
    if !jpeg.starts_with(&SOI) {
        return Err("not a JPEG stream".into());
    }
    let segment = exif_segment(tiff)?;
    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&SOI);

    let mut inserted = false;
    let mut pos = SOI.len();
    while pos < jpeg.len() {
        if jpeg[pos] != 0xFF {
            return Err(format!("expected marker at offset {pos}"));
        }
        let mut marker_pos = pos;
        while marker_pos < jpeg.len() && jpeg[marker_pos] == 0xFF {
            marker_pos += 1;
        }
        let Some(&marker) = jpeg.get(marker_pos) else {
            return Err("truncated marker".into());
        };

        if marker != APP0 && !inserted {
            out.extend_from_slice(&segment);
            inserted = true;
        }

        match marker {
            SOS | EOI => {
                out.extend_from_slice(&jpeg[pos..]);
                return Ok(out);
            }
            0x01 | 0xD0..=0xD7 => {
                out.extend_from_slice(&jpeg[pos..=marker_pos]);
                pos = marker_pos + 1;
            }
            _ => {
                let len_bytes = jpeg
                    .get(marker_pos + 1..marker_pos + 3)
                    .ok_or_else(|| "truncated segment length".to_string())?;
                let seg_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
                if seg_len < 2 {
                    return Err(format!("invalid segment length at offset {pos}"));
                }
                let end = marker_pos + 1 + seg_len;
                if end > jpeg.len() {
                    return Err(format!("segment at offset {pos} runs past end of file"));
                }
                let is_exif = marker == APP1 && jpeg[marker_pos + 3..end].starts_with(EXIF_HEADER);
                if !is_exif {
                    out.extend_from_slice(&jpeg[pos..end]);
                }
                pos = end;
            }
        }
    }

    if !inserted {
        out.extend_from_slice(&segment);
    }
    Ok(out)
}

fn metadata_error(path: &Path, reason: impl Into<String>) -> FileError {
    FileError::MetadataWrite {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Rewrite the EXIF block of the JPEG at `path` in place.
pub fn embed_exif_timestamp(
    path: &Path,
    timestamp: i64,
    orientation_hint: Option<u16>,
) -> Result<(), FileError> {
    let bytes = fs::read(path).map_err(|e| FileError::io(path, e))?;
    let local = epoch_to_local(timestamp).ok_or_else(|| metadata_error(path, "timestamp out of range"))?;

    let orientation = read_exif_orientation(&bytes)
        .or(orientation_hint)
        .or_else(|| xmp::scan(&bytes).orientation);
    let tiff = build_exif_block(local, orientation).map_err(|e| metadata_error(path, e.to_string()))?;
    let rewritten = splice_jpeg_exif(&bytes, &tiff).map_err(|reason| metadata_error(path, reason))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| FileError::io(dir, e))?;
    tmp.write_all(&rewritten).map_err(|e| FileError::io(tmp.path(), e))?;
    let permissions = fs::metadata(path).map_err(|e| FileError::io(path, e))?.permissions();
    tmp.as_file()
        .set_permissions(permissions)
        .map_err(|e| FileError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| FileError::io(path, e.error))?;
    Ok(())
}

/// Set both access and modification time to `timestamp`.
pub fn set_file_times(path: &Path, timestamp: i64) -> Result<(), FileError> {
    let ft = FileTime::from_unix_time(timestamp, 0);
    filetime::set_file_times(path, ft, ft).map_err(|e| FileError::io(path, e))
}

/// Write `timestamp` into `path` as durably as its format allows.
///
/// A failed EXIF write does not stop the file-time update; the first error
/// is returned so the caller can count it.
pub fn apply_timestamp(
    path: &Path,
    kind: MediaKind,
    timestamp: i64,
    orientation_hint: Option<u16>,
) -> Result<(), FileError> {
    let embedded = if kind.supports_exif_write() {
        embed_exif_timestamp(path, timestamp, orientation_hint)
    } else {
        Ok(())
    };
    let times = set_file_times(path, timestamp);
    embedded.and(times)
}
