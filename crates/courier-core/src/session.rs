//! Session - the coordinator between callers and the network engine
//!
//! Submission validates the request, has the engine create a task, and
//! registers a handler under the engine's identifier before the task starts.
//! Every engine callback is routed back through the registry:
//! - Progress ticks pass straight through to the caller's callbacks
//! - Promotion to a download task re-keys the handler
//! - Finished downloads are moved into place and mapped into memory
//! - Completion removes the handler and resolves the result exactly once

use crate::engine::{
    EngineRequest, HttpEngine, NetworkEngine, ResponseDisposition, TaskDelegate, TaskId,
};
use crate::error::{SessionError, TransportError, TransportErrorKind};
use crate::fs;
use crate::handler::{Completion, ProgressCallback, TaskHandler, TaskOptions};
use crate::registry::TaskRegistry;
use crate::response::{ResponseBody, TaskResult};
use bytes::Bytes;
use courier_types::{
    AuthChallenge, ChallengeResponse, HttpMethod, Progress, Request, ResponseMetadata,
    SessionConfig,
};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Consulted for every authentication challenge. `task` is `None` for
/// connection-level challenges.
pub type AuthenticationHandler =
    dyn Fn(Option<TaskId>, &AuthChallenge) -> ChallengeResponse + Send + Sync + 'static;

/// An HTTP session multiplexing many requests over one engine.
///
/// Cloning is cheap; clones share the engine, registry and handlers.
#[derive(Clone)]
pub struct Session {
    core: Arc<SessionCore>,
}

struct SessionCore {
    config: SessionConfig,
    registry: TaskRegistry,
    engine: Arc<dyn NetworkEngine>,
    auth_handler: RwLock<Option<Arc<AuthenticationHandler>>>,
    shut_down: AtomicBool,
}

impl Session {
    /// Create a session backed by the reqwest engine. Must be called from
    /// within a tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let engine = HttpEngine::new(&config)?;
        Ok(Self::with_engine(config, Arc::new(engine)))
    }

    /// Create a session on top of an arbitrary engine
    pub fn with_engine(config: SessionConfig, engine: Arc<dyn NetworkEngine>) -> Self {
        Self {
            core: Arc::new(SessionCore {
                config,
                registry: TaskRegistry::new(),
                engine,
                auth_handler: RwLock::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Number of tasks still waiting for their completion
    pub fn active_tasks(&self) -> usize {
        self.core.registry.len()
    }

    pub fn set_authentication_handler<F>(&self, handler: F)
    where
        F: Fn(Option<TaskId>, &AuthChallenge) -> ChallengeResponse + Send + Sync + 'static,
    {
        *self.core.auth_handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_authentication_handler(&self) {
        *self.core.auth_handler.write() = None;
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a request. `completion` runs exactly once, asynchronously.
    ///
    /// Returns the engine's task identifier, or [`TaskId::INVALID`] when the
    /// request failed validation and no task was created.
    pub fn submit<F>(
        &self,
        request: Request,
        method: HttpMethod,
        body: Option<Bytes>,
        options: TaskOptions,
        completion: F,
    ) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let completion: Completion = Box::new(completion);

        if self.core.shut_down.load(Ordering::Acquire) {
            warn!("Rejecting {} {}: session is shut down", method, request.url);
            self.fail_later(completion, SessionError::Transport(TransportError::cancelled()));
            return TaskId::INVALID;
        }

        if let Some(destination) = &options.destination {
            if let Err(e) = fs::validate_destination(destination) {
                warn!("Invalid download destination {}: {}", destination.display(), e);
                let error = SessionError::InvalidDownloadDestination(destination.clone());
                self.fail_later(completion, error);
                return TaskId::INVALID;
            }
        }

        let url = request.url.clone();
        let engine_request = EngineRequest {
            method,
            url: request.url,
            headers: request.headers,
            body: body.unwrap_or_default(),
            timeout: request.timeout,
        };
        let delegate: Arc<dyn TaskDelegate> = self.core.clone();
        let task = self.core.engine.create_upload_task(engine_request, delegate);

        self.core
            .registry
            .insert(task, TaskHandler::new(completion, options));
        info!("Submitted task {}: {} {}", task, method, url);

        self.core.engine.resume(task);
        task
    }

    /// Deliver `error` on the engine's queue so every completion is asynchronous
    fn fail_later(&self, completion: Completion, error: SessionError) {
        self.core
            .engine
            .dispatch(Box::new(move || completion(Err(error))));
    }

    pub fn get<F>(&self, request: Request, options: TaskOptions, completion: F) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.submit(request, HttpMethod::Get, None, options, completion)
    }

    /// HEAD responses carry no body, so only upload progress is kept from `options`
    pub fn head<F>(&self, request: Request, options: TaskOptions, completion: F) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        let options = TaskOptions {
            destination: None,
            download_progress: None,
            ..options
        };
        self.submit(request, HttpMethod::Head, None, options, completion)
    }

    pub fn post<F>(
        &self,
        request: Request,
        body: impl Into<Bytes>,
        options: TaskOptions,
        completion: F,
    ) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.submit(request, HttpMethod::Post, Some(body.into()), options, completion)
    }

    pub fn put<F>(
        &self,
        request: Request,
        body: impl Into<Bytes>,
        options: TaskOptions,
        completion: F,
    ) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.submit(request, HttpMethod::Put, Some(body.into()), options, completion)
    }

    pub fn delete<F>(&self, request: Request, options: TaskOptions, completion: F) -> TaskId
    where
        F: FnOnce(TaskResult) + Send + 'static,
    {
        self.submit(request, HttpMethod::Delete, None, options, completion)
    }

    /// Submit a request and wait for its result
    pub async fn fetch(
        &self,
        request: Request,
        method: HttpMethod,
        body: Option<Bytes>,
        options: TaskOptions,
    ) -> TaskResult {
        let (tx, rx) = oneshot::channel();
        self.submit(request, method, body, options, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or_else(|_| {
            Err(SessionError::Transport(TransportError::new(
                TransportErrorKind::Cancelled,
                "engine dropped the task without completing it",
            )))
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel a task. It completes with a cancellation error.
    pub fn cancel(&self, task: TaskId) {
        if task.is_valid() {
            self.core.engine.cancel(task);
        }
    }

    /// Cancel every in-flight task and reject further submissions
    pub fn shutdown(&self) {
        if !self.core.shut_down.swap(true, Ordering::AcqRel) {
            info!(
                "Shutting down session with {} active tasks",
                self.core.registry.len()
            );
            self.core.engine.cancel_all();
        }
    }
}

impl SessionCore {
    fn progress_callback(
        &self,
        task: TaskId,
        select: impl FnOnce(&TaskHandler) -> Option<ProgressCallback>,
    ) -> Option<ProgressCallback> {
        match self.registry.with_handler(task, |handler| select(&*handler)) {
            Some(callback) => callback,
            None => {
                trace!("Dropping progress for unknown task {}", task);
                None
            }
        }
    }
}

/// Move the download into place when a destination is set, then map it
fn materialize(location: &Path, destination: Option<&Path>) -> Result<ResponseBody, SessionError> {
    let source = match destination {
        Some(destination) => {
            fs::replace_item(location, destination).map_err(SessionError::FileOperation)?;
            destination
        }
        None => location,
    };
    fs::map_file(source).map_err(SessionError::BodyMaterialization)
}

impl TaskDelegate for SessionCore {
    fn did_send_body_data(&self, task: TaskId, progress: Progress) {
        if let Some(callback) = self.progress_callback(task, TaskHandler::upload_progress) {
            callback(progress);
        }
    }

    fn did_receive_response(
        &self,
        task: TaskId,
        response: &ResponseMetadata,
    ) -> ResponseDisposition {
        debug!("Task {} received status {}", task, response.status);
        let has_destination = self
            .registry
            .with_handler(task, |handler| handler.destination().is_some())
            .unwrap_or(false);

        if self.config.stream_to_disk || has_destination {
            ResponseDisposition::BecomeDownload
        } else {
            ResponseDisposition::Allow
        }
    }

    fn did_become_download_task(&self, upload: TaskId, download: TaskId) {
        if self.registry.rekey(upload, download) {
            debug!("Task {} is now download task {}", upload, download);
        } else {
            warn!("Promotion of unknown task {} to {}", upload, download);
        }
    }

    fn did_receive_data(&self, task: TaskId, data: Bytes) {
        if self
            .registry
            .with_handler(task, |handler| handler.append(&data))
            .is_none()
        {
            trace!("Dropping {} bytes for unknown task {}", data.len(), task);
        }
    }

    fn did_write_data(&self, task: TaskId, progress: Progress) {
        if let Some(callback) = self.progress_callback(task, TaskHandler::download_progress) {
            callback(progress);
        }
    }

    fn did_finish_downloading(&self, task: TaskId, location: &Path) {
        let Some(destination) = self
            .registry
            .with_handler(task, |handler| handler.destination().map(Path::to_path_buf))
        else {
            warn!("Finished download for unknown task {}", task);
            return;
        };

        let outcome = materialize(location, destination.as_deref());

        self.registry.with_handler(task, |handler| match outcome {
            Ok(body) => {
                debug!("Task {} body materialized ({} bytes)", task, body.len());
                handler.set_body(body);
            }
            Err(error) => {
                warn!("Task {} failed after download: {}", task, error);
                handler.defer_error(error);
            }
        });
    }

    fn did_complete(
        &self,
        task: TaskId,
        response: Option<ResponseMetadata>,
        error: Option<TransportError>,
    ) {
        let Some(handler) = self.registry.remove(task) else {
            warn!("Completion for unknown task {}", task);
            return;
        };

        let (completion, result) = handler.finish(response, error, self.config.passthrough);
        match &result {
            Ok(response) => info!("Task {} succeeded with status {}", task, response.status()),
            Err(error) => info!("Task {} failed: {}", task, error),
        }
        completion(result);
    }

    fn did_receive_challenge(
        &self,
        task: Option<TaskId>,
        challenge: &AuthChallenge,
    ) -> ChallengeResponse {
        let handler = self.auth_handler.read().clone();
        match handler {
            Some(handler) => handler(task, challenge),
            None => ChallengeResponse::default_handling(),
        }
    }
}
