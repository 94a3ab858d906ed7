use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CastellanError;

/// Windows Event Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventLevel {
    /// Informational record, no action implied.
    Information,
    /// Warning-level record.
    Warning,
    /// Error-level record.
    Error,
    /// Critical-level record.
    Critical,
}

/// Maximum allowed length of the free-text `message` field.
pub const MAX_MESSAGE_LEN: usize = 65_536;
/// Maximum allowed length of the opaque `raw_json` field.
pub const MAX_RAW_JSON_LEN: usize = 1_048_576;

/// An immutable Windows Event Log record as produced by the collector.
///
/// `unique_id` defaults to a deterministic hash of the other fields so the
/// same underlying channel record always yields the same id across restarts,
/// per the stability invariant documented on this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Absolute instant the event was recorded, with timezone offset.
    pub time: DateTime<Utc>,
    /// Host the event originated from.
    pub host: String,
    /// Event channel name, e.g. `"Security"`.
    pub channel: String,
    /// Numeric Windows event id.
    pub event_id: u32,
    /// Severity level.
    pub level: EventLevel,
    /// Acting user, may be empty when not applicable.
    pub user: String,
    /// Free-text event message.
    pub message: String,
    /// Raw JSON representation of the source record, possibly empty.
    pub raw_json: String,
    /// Opaque, caller-assignable unique id. Stable across restarts for the
    /// same underlying channel record.
    pub unique_id: String,
}

impl LogEvent {
    /// Construct a new `LogEvent`, deriving `unique_id` from the other
    /// fields when the caller does not supply one.
    ///
    /// Fails if `message` or `raw_json` exceed their documented maximum
    /// lengths.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: DateTime<Utc>,
        host: impl Into<String>,
        channel: impl Into<String>,
        event_id: u32,
        level: EventLevel,
        user: impl Into<String>,
        message: impl Into<String>,
        raw_json: impl Into<String>,
        unique_id: Option<String>,
    ) -> Result<Self, CastellanError> {
        let host = host.into();
        let channel = channel.into();
        let user = user.into();
        let message = message.into();
        let raw_json = raw_json.into();

        if message.len() > MAX_MESSAGE_LEN {
            return Err(CastellanError::OutOfBounds(format!(
                "message length {} exceeds {}",
                message.len(),
                MAX_MESSAGE_LEN
            )));
        }
        if raw_json.len() > MAX_RAW_JSON_LEN {
            return Err(CastellanError::OutOfBounds(format!(
                "raw_json length {} exceeds {}",
                raw_json.len(),
                MAX_RAW_JSON_LEN
            )));
        }

        let unique_id = unique_id.unwrap_or_else(|| {
            Self::derive_unique_id(&time, &host, &channel, event_id, &user, &message)
        });

        Ok(Self {
            time,
            host,
            channel,
            event_id,
            level,
            user,
            message,
            raw_json,
            unique_id,
        })
    }

    /// Deterministic hash of the identifying fields, used as the default
    /// `unique_id` when the caller does not assign one.
    fn derive_unique_id(
        time: &DateTime<Utc>,
        host: &str,
        channel: &str,
        event_id: u32,
        user: &str,
        message: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(time.to_rfc3339().as_bytes());
        hasher.update(b"\0");
        hasher.update(host.as_bytes());
        hasher.update(b"\0");
        hasher.update(channel.to_lowercase().as_bytes());
        hasher.update(b"\0");
        hasher.update(event_id.to_le_bytes());
        hasher.update(b"\0");
        hasher.update(user.as_bytes());
        hasher.update(b"\0");
        hasher.update(message.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True if `time` is not in the future of `now` by more than `max_skew`.
    pub fn within_clock_skew(&self, now: DateTime<Utc>, max_skew: chrono::Duration) -> bool {
        self.time <= now + max_skew
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_is_deterministic_for_equal_fields() {
        let time = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = LogEvent::new(
            time,
            "H1",
            "Security",
            4624,
            EventLevel::Information,
            "alice",
            "An account was successfully logged on",
            "",
            None,
        )
        .unwrap();
        let b = LogEvent::new(
            time,
            "H1",
            "Security",
            4624,
            EventLevel::Information,
            "alice",
            "An account was successfully logged on",
            "",
            None,
        )
        .unwrap();
        assert_eq!(a.unique_id, b.unique_id);
    }

    #[test]
    fn channel_case_is_folded_into_unique_id() {
        let time = Utc::now();
        let a = LogEvent::new(
            time,
            "H1",
            "Security",
            1,
            EventLevel::Information,
            "u",
            "m",
            "",
            None,
        )
        .unwrap();
        let b = LogEvent::new(
            time,
            "H1",
            "SECURITY",
            1,
            EventLevel::Information,
            "u",
            "m",
            "",
            None,
        )
        .unwrap();
        assert_eq!(a.unique_id, b.unique_id);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let big = "a".repeat(MAX_MESSAGE_LEN + 1);
        let result = LogEvent::new(
            Utc::now(),
            "H1",
            "Security",
            1,
            EventLevel::Information,
            "u",
            big,
            "",
            None,
        );
        assert!(result.is_err());
    }
}
