use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::LazyLock;

const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 2100;

/// `IMG-20230615-WA0007.jpg`, `VID_20230615_WA0012.mp4`, `Copy of IMG-...`
static MESSAGING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z])(?:IMG|VID)[-_](\d{4})(\d{2})(\d{2})[-_]WA\d+").unwrap()
});

struct DatePattern {
    regex: &'static LazyLock<Regex>,
    has_time: bool,
}

// Only the leading boundary is consumed, so a rejected date cannot hide the
// one right after it. The trailing boundary is checked by `ends_at_boundary`.

// 20190919-053857, 20190509_154733, 20190509154733
static RE_0: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})[-_ T]?(\d{2})(\d{2})(\d{2})").unwrap()
});
// 2016_01_30_11_49_15, 2020-10-26-163832, 2019-05-09 15.47.33
static RE_1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4})[-_.](\d{2})[-_.](\d{2})[-_ T.](\d{2})[-_.:]?(\d{2})[-_.:]?(\d{2})")
        .unwrap()
});
// 2016-01-30, 2016_01_30
static RE_2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{4})[-_.](\d{2})[-_.](\d{2})").unwrap());
// 20160130
static RE_3: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{4})(\d{2})(\d{2})").unwrap());

static PATTERNS: &[DatePattern] = &[
    DatePattern { regex: &RE_0, has_time: true },
    DatePattern { regex: &RE_1, has_time: true },
    DatePattern { regex: &RE_2, has_time: false },
    DatePattern { regex: &RE_3, has_time: false },
];

fn basename(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

/// The match must not run on into a longer digit sequence
fn ends_at_boundary(name: &str, caps: &Captures) -> bool {
    caps.get(0)
        .is_some_and(|m| !name[m.end()..].starts_with(|c: char| c.is_ascii_digit()))
}

fn component(caps: &Captures, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

/// A calendar date inside the accepted year window
fn plausible_date(year: u32, month: u32, day: u32) -> Option<NaiveDate> {
    let year = i32::try_from(year).ok()?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn noon(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(12, 0, 0)
}

fn from_captures(caps: &Captures, has_time: bool) -> Option<NaiveDateTime> {
    let date = plausible_date(component(caps, 1)?, component(caps, 2)?, component(caps, 3)?)?;
    if has_time {
        date.and_hms_opt(component(caps, 4)?, component(caps, 5)?, component(caps, 6)?)
    } else {
        noon(date)
    }
}

/// Messaging-app names carry only a date; they always resolve to local noon.
pub fn parse_messaging_app_name(filename: &str) -> Option<NaiveDateTime> {
    let caps = MESSAGING_RE.captures(basename(filename))?;
    let date = plausible_date(component(&caps, 1)?, component(&caps, 2)?, component(&caps, 3)?)?;
    noon(date)
}

/// Try each pattern in order; the first plausible date wins.
/// Date-only matches resolve to local noon.
pub fn guess_date_from_filename(filename: &str) -> Option<NaiveDateTime> {
    let name = basename(filename);
    PATTERNS.iter().find_map(|pat| {
        pat.regex
            .captures_iter(name)
            .filter(|caps| ends_at_boundary(name, caps))
            .find_map(|caps| from_captures(&caps, pat.has_time))
    })
}
