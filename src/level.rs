//! Syslog severity levels carried in the GELF `level` field.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum GelfLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    #[default]
    Informational = 6,
    Debug = 7,
}

impl GelfLevel {
    /// Numeric syslog severity as written on the wire.
    pub fn severity(self) -> u8 {
        self as u8
    }

    /// Parse a level name, falling back to `Informational`.
    pub fn parse_or_info(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for GelfLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GelfLevel::Emergency => "EMERGENCY",
            GelfLevel::Alert => "ALERT",
            GelfLevel::Critical => "CRITICAL",
            GelfLevel::Error => "ERROR",
            GelfLevel::Warning => "WARNING",
            GelfLevel::Notice => "NOTICE",
            GelfLevel::Informational => "INFO",
            GelfLevel::Debug => "DEBUG",
        };
        f.write_str(s)
    }
}

impl FromStr for GelfLevel {
    type Err = ();

    /// Accepts syslog names as well as the usual application level names.
    /// `TRACE` has no syslog counterpart and maps to `Debug`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EMERG" | "EMERGENCY" => Ok(Self::Emergency),
            "ALERT" => Ok(Self::Alert),
            "CRIT" | "CRITICAL" | "FATAL" => Ok(Self::Critical),
            "ERR" | "ERROR" => Ok(Self::Error),
            "WARN" | "WARNING" => Ok(Self::Warning),
            "NOTICE" => Ok(Self::Notice),
            "INFO" | "INFORMATIONAL" => Ok(Self::Informational),
            "DEBUG" | "TRACE" => Ok(Self::Debug),
            _ => Err(()),
        }
    }
}

impl From<log::Level> for GelfLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warning,
            log::Level::Info => Self::Informational,
            log::Level::Debug | log::Level::Trace => Self::Debug,
        }
    }
}

impl Serialize for GelfLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.severity())
    }
}
