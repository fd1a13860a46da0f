//! Courier Core - HTTP session layer
//!
//! This crate multiplexes many HTTP requests over one network engine.
//! It routes engine callbacks to per-task handlers, applies the
//! success/failure policy to finished responses, and hands bodies back
//! either from memory or as memory-mapped download files.

mod engine;
mod error;
mod fs;
mod handler;
mod registry;
mod response;
mod session;

pub use engine::*;
pub use error::*;
pub use fs::{map_file, replace_item, validate_destination};
pub use handler::{Completion, ProgressCallback, TaskOptions};
pub use response::*;
pub use session::*;

pub use courier_types::{
    is_failure_status, AuthChallenge, ChallengeDisposition, ChallengeResponse, ConfigError,
    Credential, HttpMethod, Progress, Request, ResponseMetadata, SessionConfig, StatusClass,
};
