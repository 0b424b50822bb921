//! Named lookback windows.

use crate::error::EngineError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WindowName {
    OneWeek,
    OneMonth,
    ThreeMonths,
    SixMonths,
    #[default]
    OneYear,
    TwoYears,
    ThreeYears,
    AllData,
}

impl WindowName {
    pub const ALL: [WindowName; 8] = [
        WindowName::OneWeek,
        WindowName::OneMonth,
        WindowName::ThreeMonths,
        WindowName::SixMonths,
        WindowName::OneYear,
        WindowName::TwoYears,
        WindowName::ThreeYears,
        WindowName::AllData,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            WindowName::OneWeek => "1Week",
            WindowName::OneMonth => "1Month",
            WindowName::ThreeMonths => "3Months",
            WindowName::SixMonths => "6Months",
            WindowName::OneYear => "1Year",
            WindowName::TwoYears => "2Years",
            WindowName::ThreeYears => "3Years",
            WindowName::AllData => "AllData",
        }
    }

    /// Lookback from the last timestamp; `None` means unbounded.
    pub fn lookback(&self) -> Option<Duration> {
        let days = match self {
            WindowName::OneWeek => 7,
            WindowName::OneMonth => 30,
            WindowName::ThreeMonths => 90,
            WindowName::SixMonths => 180,
            WindowName::OneYear => 365,
            WindowName::TwoYears => 730,
            WindowName::ThreeYears => 1095,
            WindowName::AllData => return None,
        };
        Some(Duration::days(days))
    }
}

impl fmt::Display for WindowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WindowName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        WindowName::ALL
            .into_iter()
            .find(|w| w.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EngineError::ConfigInvalid(format!("unknown window '{s}'")))
    }
}

impl TryFrom<String> for WindowName {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WindowName> for String {
    fn from(w: WindowName) -> String {
        w.label().to_string()
    }
}
