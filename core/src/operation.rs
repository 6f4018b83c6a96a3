//! Write operations that make up a change set.
//!
//! # Design
//! `BatchOperation` is an immutable value describing one request inside a
//! change set. Most callers never build one by hand: `ChangeSetBuilder`
//! accumulates create/update/upsert/delete operations, serializes payloads
//! with serde, and gives each operation a content-id: its 1-based position, or
//! the next id not already taken.
//! The returned `ContentRef` lets a later operation target a record that the
//! server has not committed yet (`$N`).

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::error::BatchError;
use crate::http::HttpMethod;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Payload of a single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBody {
    pub content: String,
    /// Falls back to `application/json` when absent.
    pub content_type: Option<String>,
}

impl OperationBody {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// A body without an explicit content type.
    pub fn raw(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: None,
        }
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, BatchError> {
        Ok(Self::new(serde_json::to_string(value)?, JSON_CONTENT_TYPE))
    }
}

/// One write request inside a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    pub method: HttpMethod,
    /// Path relative to the API root, an absolute URL, or a `$N` reference.
    pub target: String,
    pub body: Option<OperationBody>,
    /// Defaults to the operation's 1-based position when absent.
    pub content_id: Option<u32>,
    pub headers: Vec<(String, String)>,
}

impl BatchOperation {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: None,
            content_id: None,
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: OperationBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_content_id(mut self, content_id: u32) -> Self {
        self.content_id = Some(content_id);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Addresses a single record of an entity set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// Primary key: `accounts(<uuid>)`.
    Id(Uuid),
    /// Alternate key: `contacts(emailaddress1='a@x.com')`.
    Alternate(Vec<(String, String)>),
    /// A record created earlier in the same change set: `$N`.
    Reference(u32),
}

impl RecordKey {
    pub fn alternate<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RecordKey::Alternate(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Path of the keyed record, relative to the API root.
    pub fn path(&self, entity_set: &str) -> String {
        match self {
            RecordKey::Id(id) => format!("{entity_set}({id})"),
            RecordKey::Alternate(pairs) => {
                let key = pairs
                    .iter()
                    .map(|(name, value)| format!("{name}='{}'", value.replace('\'', "''")))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{entity_set}({key})")
            }
            RecordKey::Reference(content_id) => format!("${content_id}"),
        }
    }
}

impl From<Uuid> for RecordKey {
    fn from(id: Uuid) -> Self {
        RecordKey::Id(id)
    }
}

/// Content-id handed out by `ChangeSetBuilder` for an accumulated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentRef(u32);

impl ContentRef {
    pub fn content_id(self) -> u32 {
        self.0
    }

    /// Key that points at this operation's record from a later operation.
    pub fn key(self) -> RecordKey {
        RecordKey::Reference(self.0)
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Fluent accumulator of change-set operations.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetBuilder {
    operations: Vec<BatchOperation>,
}

impl ChangeSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a prepared operation. An explicit content-id is kept as given,
    /// even if it repeats one already in the change set. Without one, the
    /// operation gets the lowest unused id at or above its position.
    pub fn add(&mut self, operation: BatchOperation) -> ContentRef {
        let content_id = match operation.content_id {
            Some(content_id) => content_id,
            None => self.next_free_id(),
        };
        self.operations.push(operation.with_content_id(content_id));
        ContentRef(content_id)
    }

    /// `POST <entity_set>` with the serialized record.
    pub fn create<T: Serialize + ?Sized>(
        &mut self,
        entity_set: &str,
        record: &T,
    ) -> Result<ContentRef, BatchError> {
        let operation = BatchOperation::new(HttpMethod::Post, entity_set)
            .with_body(OperationBody::json(record)?);
        Ok(self.add(operation))
    }

    /// `PATCH` an existing record. `If-Match: *` makes the server fail the
    /// change set instead of creating the record when it does not exist.
    pub fn update<T: Serialize + ?Sized>(
        &mut self,
        entity_set: &str,
        key: &RecordKey,
        record: &T,
    ) -> Result<ContentRef, BatchError> {
        let operation = BatchOperation::new(HttpMethod::Patch, key.path(entity_set))
            .with_header("If-Match", "*")
            .with_body(OperationBody::json(record)?);
        Ok(self.add(operation))
    }

    /// `PATCH` that creates the record when the key matches nothing.
    pub fn upsert<T: Serialize + ?Sized>(
        &mut self,
        entity_set: &str,
        key: &RecordKey,
        record: &T,
    ) -> Result<ContentRef, BatchError> {
        let operation = BatchOperation::new(HttpMethod::Patch, key.path(entity_set))
            .with_body(OperationBody::json(record)?);
        Ok(self.add(operation))
    }

    pub fn delete(&mut self, entity_set: &str, key: &RecordKey) -> ContentRef {
        self.add(BatchOperation::new(HttpMethod::Delete, key.path(entity_set)))
    }

    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn build(self) -> Vec<BatchOperation> {
        self.operations
    }

    fn next_free_id(&self) -> u32 {
        let mut content_id = self.operations.len() as u32 + 1;
        while self
            .operations
            .iter()
            .any(|operation| operation.content_id == Some(content_id))
        {
            content_id += 1;
        }
        content_id
    }
}
