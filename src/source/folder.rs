//! Hour folders named `YYYY-MM-DD HH:00:00`.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HourFolderError;

/// strftime format of folder names.
pub const FOLDER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The hour of log data held by one top-level folder of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HourFolder(DateTime<Utc>);

impl HourFolder {
    /// Parse a folder name. Names that are not exactly on the hour are rejected.
    pub fn parse(name: &str) -> Result<Self, HourFolderError> {
        let invalid = || HourFolderError {
            name: name.to_string(),
        };
        let naive = NaiveDateTime::parse_from_str(name, FOLDER_FORMAT).map_err(|_| invalid())?;
        let start = naive.and_utc();
        if start.minute() != 0 || start.second() != 0 || Self(start).name() != name {
            return Err(invalid());
        }
        Ok(Self(start))
    }

    /// The folder holding data for the hour that contains `time`.
    pub fn containing(time: DateTime<Utc>) -> Self {
        let start = time
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(time);
        Self(start)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.0
    }

    /// The hour boundary after which no more data is expected for this folder.
    pub fn end(&self) -> DateTime<Utc> {
        self.0 + Duration::hours(1)
    }

    pub fn name(&self) -> String {
        self.0.format(FOLDER_FORMAT).to_string()
    }
}

impl fmt::Display for HourFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(FOLDER_FORMAT))
    }
}

impl FromStr for HourFolder {
    type Err = HourFolderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for HourFolder {
    type Error = HourFolderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HourFolder> for String {
    fn from(folder: HourFolder) -> Self {
        folder.name()
    }
}
