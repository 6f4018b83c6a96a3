//! Atomic change-set client for OData-style `$batch` endpoints.
//!
//! # Overview
//! Several create/update/upsert/delete operations are submitted as one
//! `multipart/mixed` request whose nested change set the server commits or
//! rejects as a unit. The decoded response maps each outcome back to its
//! operation through the content-id.
//!
//! # Design
//! - `encode` and `decode` are pure functions over text; neither touches the
//!   network nor shares state.
//! - `BatchClient` follows the host-does-IO split: `build_change_set`
//!   produces an `HttpRequest`, `parse_change_set` consumes an `HttpResponse`,
//!   and `execute_change_set` runs the round-trip through a `Transport`.
//! - Usage mistakes fail before any I/O; malformed response parts are dropped
//!   instead of failing the whole decode.

pub mod client;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod http;
pub mod operation;
pub mod result;
pub mod transport;

pub use client::BatchClient;
pub use config::ClientConfig;
pub use decode::parse_batch_response;
pub use encode::{encode_change_set, Boundaries};
pub use error::{BatchError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use operation::{BatchOperation, ChangeSetBuilder, ContentRef, OperationBody, RecordKey};
pub use result::{BatchResult, OperationResult};
pub use transport::{HttpTransport, Transport};
