use thiserror::Error;

/// Errors surfaced by channel drivers and the notification manager.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The webhook URL's host is not on the channel's allow-list.
    #[error("webhook host {0:?} is not allowed for this channel")]
    HostNotAllowed(String),

    /// The configured webhook URL could not be parsed.
    #[error("invalid webhook url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Non-success HTTP status, or a transport-level failure.
    #[error("channel transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// All retry attempts for a single send were exhausted.
    #[error("delivery to channel {channel} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Name of the channel that failed.
        channel: String,
        /// Number of attempts made, including the first.
        attempts: u32,
    },

    /// Construction-time configuration failure.
    #[error("invalid notification configuration: {0}")]
    Config(String),
}
