//! Change-set orchestration.
//!
//! # Design
//! `BatchClient` wraps a `Transport` and carries no mutable state between
//! calls. A change set is split the same way every other request is:
//! `build_change_set` produces the `HttpRequest`, `parse_change_set` consumes
//! the `HttpResponse`, and `execute_change_set` joins the two around a single
//! `Transport::send`. Concurrent calls share nothing but the transport.
//!
//! Dropping the future returned by `execute_change_set` cancels it. Once the
//! request has left the process, the server's all-or-nothing change-set
//! semantics decide the outcome.

use tracing::{debug, warn};

use crate::decode::{boundary_param, parse_batch_response};
use crate::encode::{encode_change_set, Boundaries};
use crate::error::BatchError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::operation::{BatchOperation, ChangeSetBuilder};
use crate::result::BatchResult;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct BatchClient<T> {
    transport: T,
}

impl<T: Transport> BatchClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start accumulating operations for a change set.
    pub fn create_change_set(&self) -> ChangeSetBuilder {
        ChangeSetBuilder::new()
    }

    /// Absolute URL of the `$batch` endpoint.
    pub fn batch_url(&self) -> String {
        format!(
            "{}{}/$batch",
            self.transport.base_url(),
            self.transport.api_root_path().trim_end_matches('/')
        )
    }

    pub fn build_change_set(
        &self,
        operations: &[BatchOperation],
        boundaries: &Boundaries,
    ) -> Result<HttpRequest, BatchError> {
        let body = encode_change_set(operations, self.transport.api_root_path(), boundaries)?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: self.batch_url(),
            headers: vec![
                ("Content-Type".to_string(), boundaries.content_type()),
                ("Accept".to_string(), "application/json".to_string()),
                ("OData-MaxVersion".to_string(), "4.0".to_string()),
                ("OData-Version".to_string(), "4.0".to_string()),
            ],
            body: Some(body),
        })
    }

    /// Decode a `$batch` response.
    ///
    /// A non-2xx status means the batch was rejected as a whole. A 2xx
    /// response without a multipart boundary cannot be correlated with
    /// anything and is reported as `UnparseableResponse`.
    pub fn parse_change_set(&self, response: HttpResponse) -> Result<BatchResult, BatchError> {
        if !response.is_success() {
            warn!(status = response.status, "batch rejected");
            return Err(BatchError::HttpStatus {
                status: response.status,
                body: response.body,
            });
        }

        let content_type = response.header("content-type");
        let Some(content_type) = content_type.filter(|ct| boundary_param(ct).is_some()) else {
            return Err(BatchError::UnparseableResponse {
                content_type: content_type.map(str::to_string),
            });
        };

        let results = parse_batch_response(content_type, &response.body);
        debug!(results = results.len(), "decoded change-set response");
        Ok(BatchResult::new(results))
    }

    /// Encode, send, and decode one change set.
    pub async fn execute_change_set(
        &self,
        operations: &[BatchOperation],
    ) -> Result<BatchResult, BatchError> {
        let boundaries = Boundaries::generate();
        let request = self.build_change_set(operations, &boundaries)?;
        debug!(
            operations = operations.len(),
            batch = %boundaries.batch,
            change_set = %boundaries.change_set,
            "sending change set"
        );
        let response = self.transport.send(request).await?;
        self.parse_change_set(response)
    }
}
