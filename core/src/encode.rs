//! Change-set request encoder.
//!
//! # Design
//! `encode_change_set` is a pure function: operations plus two boundary
//! tokens in, one `multipart/mixed` body out. The body holds a single part
//! whose own content is a nested `multipart/mixed` change set with one
//! `application/http` part per operation. Every line ends in CRLF; servers
//! reject LF-only framing.
//!
//! All operations are validated before any text is produced, so a GET or a
//! blank target never yields a partial payload.

use std::borrow::Cow;

use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::BatchError;
use crate::http::HttpMethod;
use crate::operation::{BatchOperation, JSON_CONTENT_TYPE};

const CRLF: &str = "\r\n";

/// The outer batch boundary and the inner change-set boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundaries {
    pub batch: String,
    pub change_set: String,
}

impl Boundaries {
    pub fn new(batch: impl Into<String>, change_set: impl Into<String>) -> Self {
        Self {
            batch: batch.into(),
            change_set: change_set.into(),
        }
    }

    /// Fresh `batch_<uuid>` / `changeset_<uuid>` tokens. v4 UUIDs come from
    /// the OS random source, so concurrent calls cannot collide in practice.
    pub fn generate() -> Self {
        Self::new(
            format!("batch_{}", Uuid::new_v4()),
            format!("changeset_{}", Uuid::new_v4()),
        )
    }

    /// `Content-Type` of the whole request body.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.batch)
    }
}

/// Serialize `operations` into a change-set request body.
///
/// Relative targets are resolved against `api_root_path` (for example
/// `/api/data/v9.2`).
pub fn encode_change_set(
    operations: &[BatchOperation],
    api_root_path: &str,
    boundaries: &Boundaries,
) -> Result<String, BatchError> {
    validate(operations)?;

    let mut out = String::new();
    line(&mut out, &format!("--{}", boundaries.batch));
    line(
        &mut out,
        &format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"",
            boundaries.change_set
        ),
    );
    line(&mut out, "");

    for (index, operation) in operations.iter().enumerate() {
        let content_id = content_id_at(operation, index);
        line(&mut out, &format!("--{}", boundaries.change_set));
        write_part(&mut out, operation, content_id, api_root_path);
    }

    line(&mut out, &format!("--{}--", boundaries.change_set));
    line(&mut out, &format!("--{}--", boundaries.batch));

    debug!(
        operations = operations.len(),
        batch = %boundaries.batch,
        bytes = out.len(),
        "encoded change set"
    );
    Ok(out)
}

/// Resolve an operation target to the path placed on the request line.
pub fn resolve_path<'a>(target: &'a str, api_root_path: &str) -> Cow<'a, str> {
    if target.starts_with('$') || target.starts_with('/') {
        return Cow::Borrowed(target);
    }
    if let Ok(url) = Url::parse(target) {
        return match url.query() {
            Some(query) => Cow::Owned(format!("{}?{query}", url.path())),
            None => Cow::Owned(url.path().to_string()),
        };
    }
    Cow::Owned(format!("{}/{target}", api_root_path.trim_end_matches('/')))
}

fn validate(operations: &[BatchOperation]) -> Result<(), BatchError> {
    if operations.is_empty() {
        return Err(BatchError::EmptyChangeSet);
    }
    for (index, operation) in operations.iter().enumerate() {
        let content_id = content_id_at(operation, index);
        if operation.method == HttpMethod::Get {
            return Err(BatchError::GetInChangeSet { content_id });
        }
        if operation.target.trim().is_empty() {
            return Err(BatchError::BlankTargetPath { content_id });
        }
    }
    Ok(())
}

fn content_id_at(operation: &BatchOperation, index: usize) -> u32 {
    operation.content_id.unwrap_or(index as u32 + 1)
}

fn write_part(out: &mut String, operation: &BatchOperation, content_id: u32, api_root_path: &str) {
    line(out, "Content-Type: application/http");
    line(out, "Content-Transfer-Encoding: binary");
    line(out, &format!("Content-ID: {content_id}"));
    line(out, "");

    let path = resolve_path(&operation.target, api_root_path);
    line(out, &format!("{} {path} HTTP/1.1", operation.method));
    for (name, value) in &operation.headers {
        line(out, &format!("{name}: {value}"));
    }

    match &operation.body {
        Some(body) => {
            let has_content_type = operation
                .headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                let content_type = body.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE);
                line(out, &format!("Content-Type: {content_type}"));
            }
            line(out, "");
            line(out, &body.content);
        }
        None => line(out, ""),
    }
}

fn line(out: &mut String, text: &str) {
    out.push_str(text);
    out.push_str(CRLF);
}
