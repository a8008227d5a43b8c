//! Byte-level scan for an embedded XMP packet.
//!
//! This is a pattern match over the raw packet text, not an XML parse. When
//! several date fields are present the leftmost one wins, even if a later
//! field carries a different value.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

const XMP_OPEN: &[u8] = b"<x:xmpmeta";
const XMP_CLOSE: &[u8] = b"</x:xmpmeta>";

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:exif:DateTimeOriginal|photoshop:DateCreated|xmp:CreateDate|xap:CreateDate|exif:DateTimeDigitized)\s*(?:=\s*["']|>)\s*(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})"#,
    )
    .unwrap()
});

static ORIENTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"tiff:Orientation\s*(?:=\s*["']|>)\s*([1-8])\b"#).unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmpScan {
    pub date: Option<NaiveDateTime>,
    pub orientation: Option<u16>,
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// The XMP packet text, from the opening marker through the closing one.
pub fn find_packet(bytes: &[u8]) -> Option<&[u8]> {
    let start = find_bytes(bytes, XMP_OPEN, 0)?;
    let end = find_bytes(bytes, XMP_CLOSE, start)? + XMP_CLOSE.len();
    Some(&bytes[start..end])
}

pub fn scan(bytes: &[u8]) -> XmpScan {
    let Some(packet) = find_packet(bytes) else {
        return XmpScan::default();
    };
    let text = String::from_utf8_lossy(packet);

    let date = DATE_RE.captures(&text).and_then(|caps| {
        let value = &caps[1];
        match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
            Ok(dt) => Some(dt),
            Err(e) => {
                debug!("unparseable XMP date {value:?}: {e}");
                None
            }
        }
    });
    let orientation = ORIENTATION_RE
        .captures(&text)
        .and_then(|caps| caps[1].parse::<u16>().ok());

    XmpScan { date, orientation }
}
