use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use std::io::Cursor;
use tracing::debug;

/// EXIF datetime layout
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

fn read_exif(bytes: &[u8]) -> Option<Exif> {
    match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => Some(exif),
        Err(e) => {
            debug!("no readable EXIF block: {e}");
            None
        }
    }
}

/// Extract DateTimeOriginal from the EXIF block of raw image bytes.
/// EXIF datetimes have no timezone info - they are local time as-is.
pub fn read_exif_date(bytes: &[u8]) -> Option<NaiveDateTime> {
    let exif = read_exif(bytes)?;
    let field = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)?;
    let raw = match &field.value {
        Value::Ascii(parts) => parts.first()?,
        _ => return None,
    };
    let text = std::str::from_utf8(raw).ok()?;
    parse_exif_datetime(text)
}

/// Orientation (1-8) from the primary image, if tagged.
pub fn read_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = read_exif(bytes)?;
    let value = exif
        .get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)?;
    u16::try_from(value).ok().filter(|v| (1..=8).contains(v))
}

pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim_end_matches('\0').trim();
    let head = s.get(..19)?;
    match NaiveDateTime::parse_from_str(head, EXIF_DATETIME_FORMAT) {
        Ok(dt) => Some(dt),
        Err(e) => {
            debug!("unparseable EXIF datetime {s:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_exif_datetime() {
        let expected = NaiveDate::from_ymd_opt(2019, 5, 9)
            .unwrap()
            .and_hms_opt(15, 47, 33)
            .unwrap();
        assert_eq!(parse_exif_datetime("2019:05:09 15:47:33"), Some(expected));
        assert_eq!(parse_exif_datetime("2019:05:09 15:47:33\0"), Some(expected));
        assert_eq!(parse_exif_datetime("0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime("    :  :     :  :  "), None);
        assert_eq!(parse_exif_datetime("2019"), None);
    }

    #[test]
    fn test_non_image_bytes() {
        assert_eq!(read_exif_date(b"definitely not an image"), None);
        assert_eq!(read_exif_orientation(b"definitely not an image"), None);
    }
}
