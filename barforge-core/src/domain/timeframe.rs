//! Target timeframes and their calendar binning rules.

use crate::error::EngineError;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of resampling targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M2,
    M3,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H4,
    H8,
    D1,
    D3,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 14] = [
        Timeframe::M1,
        Timeframe::M2,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M10,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H8,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M2 => "2m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H8 => "8h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M2 => 2,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M10 => 10,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H8 => 480,
            Timeframe::D1 => 1_440,
            Timeframe::D3 => 4_320,
            Timeframe::W1 => 10_080,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn from_duration(d: Duration) -> Option<Timeframe> {
        Timeframe::ALL.into_iter().find(|tf| tf.duration() == d)
    }

    /// Start of the calendar bin containing `ts`.
    ///
    /// Minute and hour labels bin on multiples of the timeframe counted from
    /// midnight; `1d` bins at midnight; `3d` bins every three days from
    /// `origin`; `1w` bins on Monday 00:00.
    pub fn bin_start(&self, ts: NaiveDateTime, origin: NaiveDate) -> NaiveDateTime {
        let day = ts.date();
        match self {
            Timeframe::D1 => midnight(day),
            Timeframe::D3 => {
                let offset = (day - origin).num_days().div_euclid(3) * 3;
                midnight(origin + Duration::days(offset))
            }
            Timeframe::W1 => {
                let back = i64::from(day.weekday().num_days_from_monday());
                midnight(day - Duration::days(back))
            }
            _ => {
                let minute_of_day = i64::from(ts.hour() * 60 + ts.minute());
                let start = minute_of_day - minute_of_day % self.minutes();
                midnight(day) + Duration::minutes(start)
            }
        }
    }
}

fn midnight(day: NaiveDate) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN)
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.label() == wanted)
            .ok_or_else(|| EngineError::ConfigInvalid(format!("unknown timeframe '{s}'")))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.label().to_string()
    }
}
