//! Decoded change-set outcomes.
//!
//! Results keep the order the server returned them in, which need not match
//! submission order. Correlate through `content_id`, never through position.

use serde::Deserialize;
use uuid::Uuid;

/// Outcome of one operation as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// Taken from the MIME part's `Content-ID`; absent when missing or not numeric.
    pub content_id: Option<u32>,
    /// 0 when the status line carries no parsable code.
    pub status_code: u16,
    /// Parenthesized suffix of the entity-location header, when it is a UUID.
    pub entity_id: Option<Uuid>,
    pub response_body: Option<String>,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }

    /// `error.message` of an OData JSON error body.
    pub fn error_message(&self) -> Option<String> {
        let body = self.response_body.as_deref()?;
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error.message)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// All results decoded from one batch response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub operation_results: Vec<OperationResult>,
}

impl BatchResult {
    pub fn new(operation_results: Vec<OperationResult>) -> Self {
        Self { operation_results }
    }

    /// Entity id reported for the first result carrying `content_id`.
    pub fn created_entity_id(&self, content_id: u32) -> Option<Uuid> {
        self.get(content_id).and_then(|result| result.entity_id)
    }

    pub fn get(&self, content_id: u32) -> Option<&OperationResult> {
        self.operation_results
            .iter()
            .find(|result| result.content_id == Some(content_id))
    }

    /// True when at least one result came back and every result succeeded.
    pub fn is_success(&self) -> bool {
        !self.operation_results.is_empty()
            && self.operation_results.iter().all(OperationResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.operation_results.iter().filter(|result| !result.is_success())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperationResult> {
        self.operation_results.iter()
    }

    pub fn len(&self) -> usize {
        self.operation_results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operation_results.is_empty()
    }
}

impl IntoIterator for BatchResult {
    type Item = OperationResult;
    type IntoIter = std::vec::IntoIter<OperationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.operation_results.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a OperationResult;
    type IntoIter = std::slice::Iter<'a, OperationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.operation_results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content_id: Option<u32>, status_code: u16) -> OperationResult {
        OperationResult {
            content_id,
            status_code,
            entity_id: None,
            response_body: None,
        }
    }

    #[test]
    fn success_is_exactly_2xx() {
        for code in [0, 100, 199, 300, 304, 404, 500] {
            assert!(!result(None, code).is_success(), "{code}");
        }
        for code in [200, 201, 204, 299] {
            assert!(result(None, code).is_success(), "{code}");
        }
    }

    #[test]
    fn created_entity_id_uses_first_match() {
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);
        let batch = BatchResult::new(vec![
            OperationResult {
                entity_id: Some(first),
                ..result(Some(2), 204)
            },
            OperationResult {
                entity_id: Some(second),
                ..result(Some(2), 204)
            },
        ]);
        assert_eq!(batch.created_entity_id(2), Some(first));
        assert_eq!(batch.created_entity_id(1), None);
    }

    #[test]
    fn batch_success_requires_results() {
        assert!(!BatchResult::default().is_success());
        let batch = BatchResult::new(vec![result(Some(1), 204), result(Some(2), 412)]);
        assert!(!batch.is_success());
        assert_eq!(batch.failures().count(), 1);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn error_message_reads_odata_error() {
        let failed = OperationResult {
            response_body: Some(
                r#"{"error":{"code":"0x80040217","message":"account Does Not Exist"}}"#.to_string(),
            ),
            ..result(Some(1), 404)
        };
        assert_eq!(failed.error_message().as_deref(), Some("account Does Not Exist"));
        assert_eq!(result(Some(1), 204).error_message(), None);
    }
}
