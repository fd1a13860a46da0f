//! Per-task state kept in the registry while a request is in flight

use crate::error::{SessionError, TransportError};
use crate::response::{Response, ResponseBody, TaskResult};
use bytes::{Bytes, BytesMut};
use courier_types::{is_failure_status, Progress, ResponseMetadata};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Called exactly once with the task's outcome
pub type Completion = Box<dyn FnOnce(TaskResult) + Send + 'static>;

/// Called on every progress tick of one direction
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync + 'static>;

/// Optional per-task settings supplied at submission
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Persist the body at this path instead of mapping the temporary file
    pub destination: Option<PathBuf>,
    pub upload_progress: Option<ProgressCallback>,
    pub download_progress: Option<ProgressCallback>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination = Some(path.into());
        self
    }

    pub fn on_upload_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.upload_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_download_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.download_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("destination", &self.destination)
            .field("upload_progress", &self.upload_progress.is_some())
            .field("download_progress", &self.download_progress.is_some())
            .finish()
    }
}

/// State for one in-flight task
pub struct TaskHandler {
    completion: Completion,
    upload_progress: Option<ProgressCallback>,
    download_progress: Option<ProgressCallback>,
    destination: Option<PathBuf>,
    /// Bytes delivered in memory by the engine
    buffer: BytesMut,
    /// Body materialized from a finished download
    body: Option<ResponseBody>,
    /// Local failure recorded before the engine reports completion
    deferred_error: Option<SessionError>,
}

impl TaskHandler {
    pub fn new(completion: Completion, options: TaskOptions) -> Self {
        Self {
            completion,
            upload_progress: options.upload_progress,
            download_progress: options.download_progress,
            destination: options.destination,
            buffer: BytesMut::new(),
            body: None,
            deferred_error: None,
        }
    }

    pub fn upload_progress(&self) -> Option<ProgressCallback> {
        self.upload_progress.clone()
    }

    pub fn download_progress(&self) -> Option<ProgressCallback> {
        self.download_progress.clone()
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    pub fn append(&mut self, data: &Bytes) {
        self.buffer.extend_from_slice(data);
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = Some(body);
    }

    pub fn defer_error(&mut self, error: SessionError) {
        self.deferred_error = Some(error);
    }

    /// Resolve the task's outcome, consuming the handler.
    ///
    /// Precedence: transport error, deferred local error, missing response,
    /// then the status policy (4xx/5xx fail unless `passthrough`).
    pub fn finish(
        self,
        response: Option<ResponseMetadata>,
        error: Option<TransportError>,
        passthrough: bool,
    ) -> (Completion, TaskResult) {
        let TaskHandler {
            completion,
            buffer,
            body,
            deferred_error,
            ..
        } = self;

        if let Some(error) = error {
            return (completion, Err(SessionError::Transport(error)));
        }
        if let Some(error) = deferred_error {
            return (completion, Err(error));
        }
        let Some(metadata) = response else {
            return (completion, Err(SessionError::NoResponse));
        };

        let body = body.unwrap_or_else(|| ResponseBody::from(buffer.freeze()));

        if !passthrough && is_failure_status(metadata.status) {
            return (
                completion,
                Err(SessionError::Http {
                    response: metadata,
                    body,
                }),
            );
        }

        (completion, Ok(Response { metadata, body }))
    }
}

impl fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandler")
            .field("destination", &self.destination)
            .field("buffered", &self.buffer.len())
            .field("body", &self.body)
            .field("deferred_error", &self.deferred_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use url::Url;

    fn handler() -> TaskHandler {
        TaskHandler::new(Box::new(|_| {}), TaskOptions::new())
    }

    fn metadata(status: u16) -> ResponseMetadata {
        ResponseMetadata {
            status,
            url: Url::parse("http://localhost/").unwrap(),
            headers: Vec::new(),
            content_length: None,
        }
    }

    #[test]
    fn test_transport_error_wins_over_everything() {
        let mut handler = handler();
        handler.defer_error(SessionError::NoResponse);
        let (_, result) = handler.finish(
            Some(metadata(200)),
            Some(TransportError::new(TransportErrorKind::TimedOut, "slow")),
            false,
        );
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }

    #[test]
    fn test_deferred_error_wins_over_missing_response() {
        let mut handler = handler();
        handler.defer_error(SessionError::FileOperation(std::io::Error::from(
            std::io::ErrorKind::PermissionDenied,
        )));
        let (_, result) = handler.finish(None, None, false);
        assert!(matches!(result, Err(SessionError::FileOperation(_))));
    }

    #[test]
    fn test_missing_response_is_integrity_failure() {
        let (_, result) = handler().finish(None, None, false);
        assert!(matches!(result, Err(SessionError::NoResponse)));
    }

    #[test]
    fn test_error_status_carries_buffered_body() {
        let mut handler = handler();
        handler.append(&Bytes::from_static(b"not "));
        handler.append(&Bytes::from_static(b"found"));
        let (_, result) = handler.finish(Some(metadata(404)), None, false);
        match result {
            Err(SessionError::Http { response, body }) => {
                assert_eq!(response.status, 404);
                assert_eq!(body, &b"not found"[..]);
            }
            other => panic!("expected http error, got {:?}", other),
        }
    }

    #[test]
    fn test_passthrough_delivers_error_status_as_success() {
        let (_, result) = handler().finish(Some(metadata(503)), None, true);
        assert_eq!(result.unwrap().status(), 503);
    }

    #[test]
    fn test_redirect_and_informational_statuses_succeed() {
        for status in [101, 204, 304, 399] {
            let (_, result) = handler().finish(Some(metadata(status)), None, false);
            assert!(result.is_ok(), "status {} should succeed", status);
        }
        let (_, result) = handler().finish(Some(metadata(599)), None, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_materialized_body_takes_precedence_over_buffer() {
        let mut handler = handler();
        handler.append(&Bytes::from_static(b"ignored"));
        handler.set_body(ResponseBody::from(b"file".to_vec()));
        let (_, result) = handler.finish(Some(metadata(200)), None, false);
        assert_eq!(result.unwrap().body, &b"file"[..]);
    }

    #[test]
    fn test_bodiless_response_has_empty_body() {
        let (_, result) = handler().finish(Some(metadata(200)), None, false);
        assert!(result.unwrap().body.is_empty());
    }
}
