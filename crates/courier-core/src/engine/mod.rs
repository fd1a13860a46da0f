//! Network engine - the collaborator that moves bytes
//!
//! The session never talks to the network itself. An engine:
//! - Assigns a unique identifier to every task it creates
//! - Sends request bodies and reports upload progress
//! - Promotes a task to a download task when asked, under a new identifier
//! - Raises authentication challenges
//! - Reports every event for a task, in order, to that task's delegate

mod http;

pub use http::*;

use bytes::Bytes;
use courier_types::{
    AuthChallenge, ChallengeResponse, HttpMethod, Progress, ResponseMetadata,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::TransportError;

/// Engine-assigned identifier correlating callbacks with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(i64);

impl TaskId {
    /// Returned by submissions that failed validation and never reached the engine
    pub const INVALID: TaskId = TaskId(-1);

    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request as handed to the engine: method applied, body attached
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Empty for bodiless requests
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

/// What the engine should do with a response once its headers arrive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    /// Deliver the body in memory through `did_receive_data`
    Allow,
    /// Convert into a download task that writes the body to a temporary file
    BecomeDownload,
}

/// Receiver of every engine event for a task.
///
/// Events for one task arrive in order; events for different tasks may
/// interleave arbitrarily and arrive on any thread.
pub trait TaskDelegate: Send + Sync {
    fn did_send_body_data(&self, task: TaskId, progress: Progress);

    fn did_receive_response(&self, task: TaskId, response: &ResponseMetadata)
        -> ResponseDisposition;

    fn did_become_download_task(&self, upload: TaskId, download: TaskId);

    fn did_receive_data(&self, task: TaskId, data: Bytes);

    fn did_write_data(&self, task: TaskId, progress: Progress);

    /// `location` holds the complete body and is deleted once this returns
    fn did_finish_downloading(&self, task: TaskId, location: &Path);

    fn did_complete(
        &self,
        task: TaskId,
        response: Option<ResponseMetadata>,
        error: Option<TransportError>,
    );

    /// `task` is `None` for connection-level challenges
    fn did_receive_challenge(
        &self,
        task: Option<TaskId>,
        challenge: &AuthChallenge,
    ) -> ChallengeResponse;
}

/// Job run on the engine's delivery queue
pub type DeliveryJob = Box<dyn FnOnce() + Send + 'static>;

/// An asynchronous networking engine
pub trait NetworkEngine: Send + Sync {
    /// Create a suspended task. Nothing is sent until `resume`.
    fn create_upload_task(&self, request: EngineRequest, delegate: Arc<dyn TaskDelegate>)
        -> TaskId;

    fn resume(&self, task: TaskId);

    /// Cancel a task. It still completes, with a cancellation error.
    fn cancel(&self, task: TaskId);

    fn cancel_all(&self);

    /// Run `job` asynchronously on the queue that delivers task callbacks
    fn dispatch(&self, job: DeliveryJob);
}
