//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use courier_core::{HttpMethod, ResponseMetadata, StatusClass};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a finished request reports
#[derive(Debug, Serialize)]
pub struct ResponseSummary<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub status: u16,
    pub headers: &'a [(String, String)],
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
    /// Lossy UTF-8 rendition of the body, omitted when saved to a file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub success: bool,
}

impl<'a> ResponseSummary<'a> {
    pub fn new(
        method: HttpMethod,
        metadata: &'a ResponseMetadata,
        body: &[u8],
        saved_to: Option<&Path>,
        success: bool,
    ) -> Self {
        Self {
            method,
            url: metadata.url.as_str(),
            status: metadata.status,
            headers: &metadata.headers,
            size: body.len() as u64,
            saved_to: saved_to.map(Path::to_path_buf),
            body: saved_to
                .is_none()
                .then(|| String::from_utf8_lossy(body).into_owned()),
            success,
        }
    }
}

impl fmt::Display for ResponseSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match StatusClass::from_code(self.status) {
            StatusClass::Success => style(self.status).green().bold(),
            StatusClass::Informational | StatusClass::Redirection => style(self.status).cyan().bold(),
            _ => style(self.status).red().bold(),
        };
        let mark = if self.success {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        write!(
            f,
            "{} {} {} {} ({})",
            mark,
            status,
            self.method,
            style(self.url).cyan(),
            format_bytes(self.size)
        )?;
        if let Some(path) = &self.saved_to {
            write!(f, "\n  Saved to: {}", path.display())?;
        }
        Ok(())
    }
}

/// Print a response. In human mode the status line goes to stderr and the
/// raw body to stdout, so the body can be piped.
pub fn print_response(summary: &ResponseSummary<'_>, body: &[u8], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
        OutputFormat::Human => {
            eprintln!("{}", summary);
            if summary.saved_to.is_none() && !body.is_empty() {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(body)?;
                if !body.ends_with(b"\n") {
                    writeln!(stdout)?;
                }
                stdout.flush()?;
            }
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}
