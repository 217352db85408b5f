//! Durations as integer milliseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::super::RetryConfig;

    #[test]
    fn test_durations_round_trip_as_millis() {
        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["base_delay"], 500);
        assert_eq!(json["max_delay"], 10_000);

        let parsed: RetryConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, RetryConfig::default());
    }
}
