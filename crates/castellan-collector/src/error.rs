use thiserror::Error;

/// Errors originating from the collector and its bookmark/channel
/// collaborators.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Construction-time configuration failure; fails fast at startup.
    #[error("invalid collector configuration: {0}")]
    Config(String),

    /// The underlying event channel could not be accessed (connection
    /// refused, permission denied, channel does not exist). Non-fatal: the
    /// caller logs and backs off or skips.
    #[error("channel access error: {0}")]
    ChannelAccess(String),

    /// The configured filter expression failed to compile.
    #[error("filter compile error: {0}")]
    FilterCompile(String),

    /// Bookmark persistence failure.
    #[error("bookmark store error: {0}")]
    Bookmark(#[from] std::io::Error),

    /// Bookmark payload could not be (de)serialized.
    #[error("bookmark serde error: {0}")]
    BookmarkSerde(#[from] serde_json::Error),
}
