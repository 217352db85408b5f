use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What `submit` does when the queue is at capacity.
///
/// There is no `Default`; the policy must be chosen in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait until a slot frees up
    Block,
    /// Evict the oldest queued task and count it as dropped
    Evict,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Block => f.write_str("block"),
            OverflowPolicy::Evict => f.write_str("evict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    None,
    Low,
    Medium,
    High,
}

impl BackpressureLevel {
    pub fn from_fill_ratio(ratio: f64) -> Self {
        if ratio < 0.5 {
            BackpressureLevel::None
        } else if ratio < 0.8 {
            BackpressureLevel::Low
        } else if ratio < 0.95 {
            BackpressureLevel::Medium
        } else {
            BackpressureLevel::High
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_from_ratio() {
        assert_eq!(BackpressureLevel::from_fill_ratio(0.0), BackpressureLevel::None);
        assert_eq!(BackpressureLevel::from_fill_ratio(0.6), BackpressureLevel::Low);
        assert_eq!(BackpressureLevel::from_fill_ratio(0.9), BackpressureLevel::Medium);
        assert_eq!(BackpressureLevel::from_fill_ratio(1.0), BackpressureLevel::High);
    }
}
