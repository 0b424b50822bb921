//! Artifact stems: `<asset>_<window>[_<tf>]_<role>_<stamp>`.
//!
//! The stamp is UTC `YYYYMMDDTHHMMSSmmm`, optionally followed by a `-N`
//! clash suffix. Second-resolution stamps (`YYYYMMDDTHHMMSS`) are accepted
//! when parsing.

use barforge_core::domain::{Role, Timeframe, WindowName};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

const SECOND_STAMP_LEN: usize = 15;
const MILLI_STAMP_LEN: usize = 18;

pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3f").to_string()
}

/// `stamp` with a clash suffix; `0` means no suffix.
pub fn with_suffix(stamp: &str, suffix: u32) -> String {
    if suffix == 0 {
        stamp.to_string()
    } else {
        format!("{stamp}-{suffix}")
    }
}

/// Parse a stamp token into its instant and clash suffix.
pub fn parse_stamp(token: &str) -> Option<(NaiveDateTime, u32)> {
    let (stamp, suffix) = match token.split_once('-') {
        Some((stamp, n)) if all_digits(n) => (stamp, n.parse::<u32>().ok()?),
        Some(_) => return None,
        None => (token, 0),
    };
    if !stamp.is_ascii() {
        return None;
    }
    let seconds = stamp.get(..SECOND_STAMP_LEN)?;
    let base = NaiveDateTime::parse_from_str(seconds, "%Y%m%dT%H%M%S").ok()?;
    let at = match stamp.len() {
        SECOND_STAMP_LEN => base,
        MILLI_STAMP_LEN => {
            let digits = &stamp[SECOND_STAMP_LEN..];
            if !all_digits(digits) {
                return None;
            }
            let millis: i64 = digits.parse().ok()?;
            base + Duration::milliseconds(millis)
        }
        _ => return None,
    };
    Some((at, suffix))
}

// `str::parse` accepts a leading sign
fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn build_stem(
    asset: &str,
    window: WindowName,
    timeframe: Option<Timeframe>,
    role: Role,
    stamp: &str,
) -> String {
    match timeframe {
        Some(tf) => format!("{asset}_{window}_{tf}_{role}_{stamp}"),
        None => format!("{asset}_{window}_{role}_{stamp}"),
    }
}

/// Tokens recovered from a stem. Every field past the asset is optional so
/// that foreign file names still classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemParts {
    pub asset: String,
    pub window: Option<WindowName>,
    pub timeframes: Vec<Timeframe>,
    pub role: Option<Role>,
    pub created_at: Option<NaiveDateTime>,
    pub suffix: u32,
}

pub fn parse_stem(stem: &str) -> StemParts {
    let tokens: Vec<&str> = stem.split('_').collect();
    let asset = tokens.first().copied().unwrap_or_default().to_string();
    let mut rest: &[&str] = tokens.get(1..).unwrap_or_default();

    let mut created_at = None;
    let mut suffix = 0;
    if let Some((last, head)) = rest.split_last() {
        if let Some((at, n)) = parse_stamp(last) {
            created_at = Some(at);
            suffix = n;
            rest = head;
        }
    }

    let mut role = None;
    if created_at.is_some() {
        if let Some((last, head)) = rest.split_last() {
            if let Ok(r) = last.parse::<Role>() {
                role = Some(r);
                rest = head;
            }
        }
    }

    let window = rest.first().and_then(|t| t.parse::<WindowName>().ok());
    let timeframes = rest
        .iter()
        .skip(usize::from(window.is_some()))
        .filter_map(|t| t.parse::<Timeframe>().ok())
        .collect();

    StemParts {
        asset,
        window,
        timeframes,
        role,
        created_at,
        suffix,
    }
}
