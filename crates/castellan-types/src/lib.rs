#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **castellan-types** – shared data model for the Castellan security-event
//! triage pipeline.
//!
//! This crate is intentionally free of async runtime and transport
//! dependencies so every other crate in the workspace can depend on it
//! without pulling in I/O machinery, mirroring how the wider workspace keeps
//! its core types crate leaf-level.

mod error;
mod event;
mod fingerprint;
mod response;
mod security_event;

pub use error::CastellanError;
pub use event::{EventLevel, LogEvent};
pub use fingerprint::Fingerprint;
pub use response::{EventType, LlmSecurityEventResponse, RiskLevel};
pub use security_event::{SecurityEvent, VectorPoint};

/// Dense embedding vector. An empty vector is the sentinel for "embedding
/// failed" and MUST NOT be persisted to a [`VectorPoint`].
pub type Embedding = Vec<f32>;

/// Convenience result alias used across the workspace's library crates.
pub type Result<T> = std::result::Result<T, CastellanError>;
