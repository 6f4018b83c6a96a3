//! In-memory OData-style service with a `$batch` endpoint.
//!
//! Every change set is applied to a scratch copy of the store and committed
//! only if all of its operations succeed; otherwise the store is untouched
//! and a single error part is returned for the failing operation.

pub mod multipart;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use multipart::{BatchEntry, RequestPart, ResponseEntry, ResponsePart};

pub const API_ROOT: &str = "/api/data/v9.2";

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default)]
pub struct Store {
    sets: HashMap<String, HashMap<Uuid, Record>>,
}

impl Store {
    pub fn records(&self, entity_set: &str) -> Vec<Record> {
        self.sets
            .get(entity_set)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn set_mut(&mut self, entity_set: &str) -> &mut HashMap<Uuid, Record> {
        self.sets.entry(entity_set.to_string()).or_default()
    }

    fn find(&self, entity_set: &str, key: &Key) -> Option<Uuid> {
        let records = self.sets.get(entity_set)?;
        match key {
            Key::Id(id) => records.contains_key(id).then_some(*id),
            Key::Alternate(pairs) => records.iter().find_map(|(id, record)| {
                pairs
                    .iter()
                    .all(|(name, value)| {
                        record.get(name).and_then(Value::as_str) == Some(value.as_str())
                    })
                    .then_some(*id)
            }),
        }
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with_store(Db::default())
}

pub fn app_with_store(db: Db) -> Router {
    Router::new()
        .route(&format!("{API_ROOT}/$batch"), post(batch))
        .route(&format!("{API_ROOT}/{{entity_set}}"), get(list_records))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_records(State(db): State<Db>, Path(entity_set): Path<String>) -> Json<Value> {
    let store = db.read().await;
    Json(json!({ "value": store.records(&entity_set) }))
}

async fn batch(State(db): State<Db>, headers: HeaderMap, body: String) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let Some(batch_boundary) = multipart::boundary(content_type) else {
        return error_response(StatusCode::BAD_REQUEST, "missing multipart boundary");
    };
    let Some(entries) = multipart::read_batch(&body, batch_boundary) else {
        return error_response(StatusCode::BAD_REQUEST, "malformed batch body");
    };
    let origin = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default();

    let mut store = db.write().await;
    let responses: Vec<ResponseEntry> = entries
        .iter()
        .map(|entry| match entry {
            BatchEntry::ChangeSet(parts) => apply_change_set(&mut store, parts, &origin),
            BatchEntry::Single(part) => ResponseEntry::Single(failure(
                part.content_id,
                StatusCode::NOT_IMPLEMENTED,
                "requests outside a change set are not supported",
            )),
        })
        .collect();
    drop(store);

    let response_boundary = format!("batchresponse_{}", Uuid::new_v4());
    let change_set_boundary = format!("changesetresponse_{}", Uuid::new_v4());
    let text = multipart::write_batch(&responses, &response_boundary, &change_set_boundary);
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/mixed; boundary={response_boundary}"),
            ),
            (header::HeaderName::from_static("odata-version"), "4.0".to_string()),
        ],
        text,
    )
        .into_response()
}

fn apply_change_set(store: &mut Store, parts: &[RequestPart], origin: &str) -> ResponseEntry {
    let mut scratch = store.clone();
    let mut created: HashMap<u32, (String, Uuid)> = HashMap::new();
    let mut results = Vec::with_capacity(parts.len());

    for part in parts {
        match apply_operation(&mut scratch, &created, part) {
            Ok(Some((entity_set, id))) => {
                results.push(ResponsePart {
                    content_id: part.content_id,
                    status: StatusCode::NO_CONTENT.as_u16(),
                    headers: vec![
                        ("OData-Version".to_string(), "4.0".to_string()),
                        (
                            "OData-EntityId".to_string(),
                            format!("{origin}{API_ROOT}/{entity_set}({id})"),
                        ),
                    ],
                    body: None,
                });
                if let Some(content_id) = part.content_id {
                    created.insert(content_id, (entity_set, id));
                }
            }
            Ok(None) => results.push(ResponsePart {
                content_id: part.content_id,
                status: StatusCode::NO_CONTENT.as_u16(),
                headers: vec![("OData-Version".to_string(), "4.0".to_string())],
                body: None,
            }),
            Err((status, message)) => {
                debug!(content_id = ?part.content_id, %status, message, "change set rolled back");
                return ResponseEntry::Single(failure(part.content_id, status, message));
            }
        }
    }

    *store = scratch;
    info!(operations = parts.len(), "change set committed");
    ResponseEntry::ChangeSet(results)
}

type OpResult = Result<Option<(String, Uuid)>, (StatusCode, &'static str)>;

fn apply_operation(
    store: &mut Store,
    created: &HashMap<u32, (String, Uuid)>,
    part: &RequestPart,
) -> OpResult {
    let target = resolve_target(&part.path, created)
        .ok_or((StatusCode::BAD_REQUEST, "unrecognized target"))?;

    match (part.method.as_str(), target.key) {
        ("POST", None) => {
            let record = parse_record(&part.body)?;
            let id = Uuid::new_v4();
            store.set_mut(&target.entity_set).insert(id, with_id(record, id));
            Ok(Some((target.entity_set, id)))
        }
        ("PATCH" | "PUT", Some(key)) => {
            let changes = parse_record(&part.body)?;
            let replace = part.method == "PUT";
            match store.find(&target.entity_set, &key) {
                Some(id) => {
                    let records = store.set_mut(&target.entity_set);
                    let record = records.entry(id).or_default();
                    if replace {
                        *record = with_id(Record::new(), id);
                    }
                    record.extend(changes);
                    Ok(Some((target.entity_set, id)))
                }
                None if part.header("If-Match") == Some("*") => {
                    Err((StatusCode::NOT_FOUND, "record does not exist"))
                }
                None => {
                    let (id, mut record) = match key {
                        Key::Id(id) => (id, Record::new()),
                        Key::Alternate(pairs) => (
                            Uuid::new_v4(),
                            pairs
                                .into_iter()
                                .map(|(name, value)| (name, Value::String(value)))
                                .collect(),
                        ),
                    };
                    record.extend(changes);
                    store.set_mut(&target.entity_set).insert(id, with_id(record, id));
                    Ok(Some((target.entity_set, id)))
                }
            }
        }
        ("DELETE", Some(key)) => {
            let id = store
                .find(&target.entity_set, &key)
                .ok_or((StatusCode::NOT_FOUND, "record does not exist"))?;
            store.set_mut(&target.entity_set).remove(&id);
            Ok(None)
        }
        ("GET", _) => Err((StatusCode::BAD_REQUEST, "GET is not allowed in a change set")),
        _ => Err((StatusCode::METHOD_NOT_ALLOWED, "method not allowed for target")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Key {
    Id(Uuid),
    Alternate(Vec<(String, String)>),
}

#[derive(Debug)]
struct Target {
    entity_set: String,
    key: Option<Key>,
}

fn resolve_target(path: &str, created: &HashMap<u32, (String, Uuid)>) -> Option<Target> {
    if let Some(reference) = path.strip_prefix('$') {
        let (entity_set, id) = created.get(&reference.parse::<u32>().ok()?)?;
        return Some(Target {
            entity_set: entity_set.clone(),
            key: Some(Key::Id(*id)),
        });
    }

    let relative = path.strip_prefix(API_ROOT)?.trim_start_matches('/');
    let Some((entity_set, rest)) = relative.split_once('(') else {
        return Some(Target {
            entity_set: relative.to_string(),
            key: None,
        });
    };
    let inner = rest.strip_suffix(')')?;
    let key = match Uuid::parse_str(inner) {
        Ok(id) => Key::Id(id),
        Err(_) => Key::Alternate(parse_alternate_key(inner)?),
    };
    Some(Target {
        entity_set: entity_set.to_string(),
        key: Some(key),
    })
}

/// `name='value',other='x'`, with `''` as an escaped quote.
fn parse_alternate_key(inner: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = inner;
    while !rest.is_empty() {
        let (name, after) = rest.split_once("='")?;
        let mut value = String::new();
        let mut chars = after.char_indices().peekable();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    value.push('\'');
                } else {
                    end = Some(i + 1);
                    break;
                }
            } else {
                value.push(c);
            }
        }
        pairs.push((name.trim().to_string(), value));
        rest = after[end?..].trim_start_matches(',');
    }
    (!pairs.is_empty()).then_some(pairs)
}

fn parse_record(body: &str) -> Result<Record, (StatusCode, &'static str)> {
    match serde_json::from_str(body) {
        Ok(Value::Object(record)) => Ok(record),
        _ => Err((StatusCode::BAD_REQUEST, "body must be a JSON object")),
    }
}

fn with_id(mut record: Record, id: Uuid) -> Record {
    record.insert("id".to_string(), Value::String(id.to_string()));
    record
}

fn failure(content_id: Option<u32>, status: StatusCode, message: &str) -> ResponsePart {
    ResponsePart {
        content_id,
        status: status.as_u16(),
        headers: vec![
            (
                "Content-Type".to_string(),
                "application/json; odata.metadata=minimal".to_string(),
            ),
            ("OData-Version".to_string(), "4.0".to_string()),
        ],
        body: Some(error_body(message).to_string()),
    }
}

fn error_body(message: &str) -> Value {
    json!({ "error": { "code": "0x80040217", "message": message } })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(error_body(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_key_parsing() {
        assert_eq!(
            parse_alternate_key("emailaddress1='a@x.com'"),
            Some(vec![("emailaddress1".to_string(), "a@x.com".to_string())])
        );
        assert_eq!(
            parse_alternate_key("a='O''Brien',b='x'"),
            Some(vec![
                ("a".to_string(), "O'Brien".to_string()),
                ("b".to_string(), "x".to_string()),
            ])
        );
        assert_eq!(parse_alternate_key("a='unterminated"), None);
    }

    #[test]
    fn targets_resolve() {
        let mut created = HashMap::new();
        let id = Uuid::new_v4();
        created.insert(1, ("accounts".to_string(), id));

        let t = resolve_target("$1", &created).unwrap();
        assert_eq!(t.entity_set, "accounts");
        assert_eq!(t.key, Some(Key::Id(id)));

        let t = resolve_target("/api/data/v9.2/accounts", &created).unwrap();
        assert_eq!(t.entity_set, "accounts");
        assert!(t.key.is_none());

        assert!(resolve_target("$9", &created).is_none());
        assert!(resolve_target("/other/accounts", &created).is_none());
    }

    #[test]
    fn failed_change_set_leaves_store_untouched() {
        let mut store = Store::default();
        let parts = vec![
            RequestPart {
                content_id: Some(1),
                method: "POST".to_string(),
                path: format!("{API_ROOT}/accounts"),
                headers: Vec::new(),
                body: r#"{"name":"A"}"#.to_string(),
            },
            RequestPart {
                content_id: Some(2),
                method: "PATCH".to_string(),
                path: format!("{API_ROOT}/accounts({})", Uuid::nil()),
                headers: vec![("If-Match".to_string(), "*".to_string())],
                body: "{}".to_string(),
            },
        ];
        let entry = apply_change_set(&mut store, &parts, "http://localhost");
        let ResponseEntry::Single(part) = entry else {
            panic!("expected a single error part");
        };
        assert_eq!(part.content_id, Some(2));
        assert_eq!(part.status, 404);
        assert!(store.records("accounts").is_empty());
    }
}
