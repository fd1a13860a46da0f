//! CLI command implementations

use crate::output::{print_response, ResponseSummary};
use crate::progress::TransferProgress;
use crate::{OutputFormat, RequestArgs};
use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use courier_core::{
    ChallengeResponse, Credential, HttpMethod, Request, Session, SessionConfig, SessionError,
    TaskOptions,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

// ============================================================================
// Setup
// ============================================================================

pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => {
            let config = SessionConfig::load(path)?;
            debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(SessionConfig::default()),
    }
}

pub async fn read_body(data: Option<String>, data_file: Option<PathBuf>) -> Result<Option<Bytes>> {
    if let Some(data) = data {
        return Ok(Some(Bytes::from(data)));
    }
    match data_file {
        Some(path) => {
            let contents = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Some(Bytes::from(contents)))
        }
        None => Ok(None),
    }
}

/// Split `name:value`
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header '{}': expected name:value", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header '{}': empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Split `user:password`; a missing password is empty
fn parse_user(raw: &str) -> Credential {
    let (username, password) = raw.split_once(':').unwrap_or((raw, ""));
    Credential::Basic {
        username: username.to_string(),
        password: password.to_string(),
    }
}

fn build_request(args: &RequestArgs) -> Result<Request> {
    let mut request =
        Request::parse(&args.url).with_context(|| format!("Invalid URL '{}'", args.url))?;
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if let Some(secs) = args.timeout {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("Timeout must be a positive number of seconds");
        }
        request = request.timeout(Duration::from_secs_f64(secs));
    }
    Ok(request)
}

// ============================================================================
// Request Command
// ============================================================================

pub async fn send(
    mut config: SessionConfig,
    method: HttpMethod,
    args: RequestArgs,
    body: Option<Bytes>,
    format: OutputFormat,
) -> Result<()> {
    if args.passthrough {
        config.passthrough = true;
    }
    let request = build_request(&args)?;
    let session = Session::new(config)?;

    if let Some(user) = &args.user {
        let credential = parse_user(user);
        session.set_authentication_handler(move |_task, _challenge| {
            ChallengeResponse::use_credential(credential.clone())
        });
    }

    let mut progress = TransferProgress::new(format);
    let mut options = TaskOptions::new();
    if body.is_some() {
        options = options.on_upload_progress(progress.upload_callback());
    }
    if method.expects_response_body() {
        options = options.on_download_progress(progress.download_callback());
        if let Some(path) = &args.output {
            options = options.destination(path);
        }
    }

    let (tx, mut rx) = oneshot::channel();
    let task = session.submit(request, method, body, options, move |result| {
        let _ = tx.send(result);
    });

    let received = tokio::select! {
        result = &mut rx => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("Interrupted; cancelling task {}", task);
            session.cancel(task);
            rx.await
        }
    };
    let result = received.context("Request was dropped without completing")?;

    progress.finish(result.is_ok());
    session.shutdown();

    match result {
        Ok(response) => {
            let saved_to = args.output.as_deref().filter(|_| method.expects_response_body());
            let summary =
                ResponseSummary::new(method, &response.metadata, &response.body, saved_to, true);
            print_response(&summary, &response.body, format)
        }
        Err(SessionError::Http { response, body }) => {
            let summary = ResponseSummary::new(method, &response, &body, None, false);
            print_response(&summary, &body, format)?;
            bail!("Server responded with status {}", response.status)
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("{} {} failed", method, args.url))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Accept: text/plain").unwrap(),
            ("Accept".to_string(), "text/plain".to_string())
        );
        assert_eq!(
            parse_header("X-Time:12:30").unwrap(),
            ("X-Time".to_string(), "12:30".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_parse_user() {
        assert_eq!(
            parse_user("alice:secret"),
            Credential::Basic {
                username: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
        assert_eq!(
            parse_user("bob"),
            Credential::Basic {
                username: "bob".to_string(),
                password: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_read_body_prefers_inline_data() {
        let body = read_body(Some("fooBar".to_string()), None).await.unwrap();
        assert_eq!(body.as_deref(), Some(&b"fooBar"[..]));
        assert!(read_body(None, None).await.unwrap().is_none());
    }
}
