use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Syslog severity of a journal entry.
///
/// Ordered from most to least severe, matching the numeric journald
/// `PRIORITY` field (0 = emerg, 7 = debug).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Emerg,
    Alert,
    Crit,
    Err,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    /// Maps a journald priority number. Values above 7 clamp to `Debug`.
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            0 => Severity::Emerg,
            1 => Severity::Alert,
            2 => Severity::Crit,
            3 => Severity::Err,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            _ => Severity::Debug,
        }
    }

    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Emerg => "emerg",
            Severity::Alert => "alert",
            Severity::Crit => "crit",
            Severity::Err => "err",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        if let Ok(priority) = s.trim().parse::<u8>() {
            return Ok(Severity::from_priority(priority));
        }

        match s.trim().to_lowercase().as_str() {
            "emerg" | "emergency" | "panic" => Ok(Severity::Emerg),
            "alert" => Ok(Severity::Alert),
            "crit" | "critical" => Ok(Severity::Crit),
            "err" | "error" => Ok(Severity::Err),
            "warning" | "warn" => Ok(Severity::Warning),
            "notice" => Ok(Severity::Notice),
            "info" => Ok(Severity::Info),
            "debug" => Ok(Severity::Debug),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(Severity::from_priority(0), Severity::Emerg);
        assert_eq!(Severity::from_priority(3), Severity::Err);
        assert_eq!(Severity::from_priority(6), Severity::Info);
        assert_eq!(Severity::from_priority(42), Severity::Debug);
        assert_eq!(Severity::Warning.priority(), 4);
    }

    #[test]
    fn test_parse_names_and_numbers() {
        assert_eq!("4".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("ERROR".parse::<Severity>().unwrap(), Severity::Err);
        assert_eq!("crit".parse::<Severity>().unwrap(), Severity::Crit);
        assert_eq!(
            "loud".parse::<Severity>().unwrap_err(),
            "unknown severity 'loud'"
        );
    }

    #[test]
    fn test_ordering_most_severe_first() {
        assert!(Severity::Emerg < Severity::Err);
        assert!(Severity::Info < Severity::Debug);
    }
}
