use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\d+\)\.").unwrap());

/// Takeout truncates sidecar names (including `.json`) to this many bytes
const MAX_SIDECAR_NAME_LEN: usize = 51;

/// Timestamp keys in priority order
const TIMESTAMP_KEYS: &[&str] = &["photoTakenTime", "creationTime"];

/// Parse Google's JSON metadata and extract the capture time in epoch seconds.
/// `timestamp` is usually a decimal string, sometimes a bare integer.
pub fn parse_google_json(json_bytes: &[u8]) -> Option<i64> {
    let data: serde_json::Value = match serde_json::from_slice(json_bytes) {
        Ok(v) => v,
        Err(e) => {
            debug!("sidecar is not valid JSON: {e}");
            return None;
        }
    };

    TIMESTAMP_KEYS.iter().find_map(|key| {
        let ts = data.get(key)?.get("timestamp")?;
        ts.as_i64()
            .or_else(|| ts.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
    })
}

fn shorten_name(filename: &str) -> String {
    let max_len = MAX_SIDECAR_NAME_LEN - ".json".len();
    if filename.len() + ".json".len() > MAX_SIDECAR_NAME_LEN {
        let mut end = max_len;
        while end > 0 && !filename.is_char_boundary(end) {
            end -= 1;
        }
        filename[..end].to_string()
    } else {
        filename.to_string()
    }
}

/// `image(1).jpg` -> `image.jpg(1)`
fn bracket_swap(filename: &str) -> String {
    if let Some(m) = BRACKET_RE.find_iter(filename).last() {
        let bracket = m.as_str().replace('.', "");
        if let Some(pos) = filename.rfind(&bracket) {
            let mut result = String::with_capacity(filename.len());
            result.push_str(&filename[..pos]);
            result.push_str(&filename[pos + bracket.len()..]);
            result.push_str(&bracket);
            return result;
        }
    }
    filename.to_string()
}

fn no_extension(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Candidate sidecar names for a media file, most likely first.
fn sidecar_names(filename: &str) -> Vec<String> {
    let mut names = vec![
        format!("{filename}.json"),
        format!("{}.json", no_extension(filename)),
        format!("{filename}.supplemental-metadata.json"),
        format!("{}.json", bracket_swap(filename)),
        format!("{}.json", shorten_name(filename)),
    ];
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Locate the sidecar JSON beside `media_path`, if any.
///
/// Exact names are tried first; if none exists the directory is listed once
/// and names are compared after NFC normalization (macOS archives store NFD).
pub fn find_sidecar(media_path: &Path) -> Option<PathBuf> {
    let dir = media_path.parent()?;
    let filename = media_path.file_name()?.to_str()?;
    let names = sidecar_names(filename);

    for name in &names {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let normalized: HashMap<String, PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            name.ends_with(".json")
                .then(|| (name.nfc().collect::<String>(), entry.path()))
        })
        .collect();

    names
        .iter()
        .find_map(|name| normalized.get(&name.nfc().collect::<String>()).cloned())
}

/// Sidecar reader: a missing file or a file without a usable timestamp both give None.
pub fn read_sidecar_timestamp(media_path: &Path) -> Option<i64> {
    let sidecar = find_sidecar(media_path)?;
    match fs::read(&sidecar) {
        Ok(bytes) => parse_google_json(&bytes),
        Err(e) => {
            debug!("could not read sidecar {}: {e}", sidecar.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_google_json() {
        assert_eq!(
            parse_google_json(br#"{"photoTakenTime": {"timestamp": "1592222400", "formatted": "x"}}"#),
            Some(1_592_222_400)
        );
        assert_eq!(
            parse_google_json(br#"{"photoTakenTime": {"timestamp": 1592222400}}"#),
            Some(1_592_222_400)
        );
        assert_eq!(
            parse_google_json(br#"{"creationTime": {"timestamp": "1500000000"}}"#),
            Some(1_500_000_000)
        );
        // photoTakenTime without a timestamp falls through to creationTime
        assert_eq!(
            parse_google_json(br#"{"photoTakenTime": {}, "creationTime": {"timestamp": "7"}}"#),
            Some(7)
        );
        assert_eq!(parse_google_json(br#"{"title": "x"}"#), None);
        assert_eq!(parse_google_json(b"not json"), None);
    }

    #[test]
    fn test_sidecar_name_variants() {
        assert_eq!(bracket_swap("image(1).jpg"), "image.jpg(1)");
        assert_eq!(bracket_swap("image.jpg"), "image.jpg");
        let long = "a".repeat(60) + ".jpg";
        assert_eq!(shorten_name(&long).len() + ".json".len(), MAX_SIDECAR_NAME_LEN);
        assert_eq!(sidecar_names("a.jpg")[..2], ["a.jpg.json".to_string(), "a.json".to_string()]);
    }

    #[test]
    fn test_find_sidecar_prefers_full_name() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("a.jpg");
        fs::write(&media, b"x").unwrap();
        fs::write(dir.path().join("a.json"), b"{}").unwrap();
        fs::write(dir.path().join("a.jpg.json"), b"{}").unwrap();
        assert_eq!(find_sidecar(&media), Some(dir.path().join("a.jpg.json")));
    }

    #[test]
    fn test_find_sidecar_by_stem_and_bracket() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("b.jpg");
        fs::write(dir.path().join("b.json"), b"{}").unwrap();
        assert_eq!(find_sidecar(&media), Some(dir.path().join("b.json")));

        let dup = dir.path().join("c(1).jpg");
        fs::write(dir.path().join("c.jpg(1).json"), b"{}").unwrap();
        assert_eq!(find_sidecar(&dup), Some(dir.path().join("c.jpg(1).json")));
    }

    #[test]
    fn test_find_sidecar_normalizes_unicode() {
        let dir = tempdir().unwrap();
        // NFC media name, NFD sidecar name
        let media = dir.path().join("caf\u{e9}.jpg");
        let sidecar = dir.path().join("cafe\u{301}.jpg.json");
        fs::write(&sidecar, b"{}").unwrap();
        assert_eq!(find_sidecar(&media), Some(sidecar));
    }

    #[test]
    fn test_missing_sidecar() {
        let dir = tempdir().unwrap();
        assert_eq!(read_sidecar_timestamp(&dir.path().join("none.jpg")), None);
    }
}
