//! Minimal multipart reader/writer for the mock `$batch` endpoint.

/// One `application/http` request taken from a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPart {
    pub content_id: Option<u32>,
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestPart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Top-level entry of a batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEntry {
    ChangeSet(Vec<RequestPart>),
    Single(RequestPart),
}

/// One response part written back to the client.
#[derive(Debug, Clone)]
pub struct ResponsePart {
    pub content_id: Option<u32>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Response to one top-level entry.
#[derive(Debug, Clone)]
pub enum ResponseEntry {
    ChangeSet(Vec<ResponsePart>),
    Single(ResponsePart),
}

pub fn boundary(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"')).filter(|b| !b.is_empty())
        } else {
            None
        }
    })
}

/// Returns `None` when the body is not a well-formed batch.
pub fn read_batch(body: &str, batch_boundary: &str) -> Option<Vec<BatchEntry>> {
    let mut entries = Vec::new();
    for part in sections(body, batch_boundary) {
        let (head, rest) = split_head(part);
        let content_type = header(head, "content-type").unwrap_or_default();
        if content_type.to_ascii_lowercase().starts_with("multipart/mixed") {
            let inner = boundary(content_type)?;
            let requests = sections(rest, inner)
                .into_iter()
                .map(read_request)
                .collect::<Option<Vec<_>>>()?;
            entries.push(BatchEntry::ChangeSet(requests));
        } else {
            entries.push(BatchEntry::Single(read_request(part)?));
        }
    }
    Some(entries)
}

pub fn write_batch(entries: &[ResponseEntry], batch_boundary: &str, change_set_boundary: &str) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("--{batch_boundary}\r\n"));
        match entry {
            ResponseEntry::Single(part) => write_part(&mut out, part),
            ResponseEntry::ChangeSet(parts) => {
                out.push_str(&format!(
                    "Content-Type: multipart/mixed; boundary={change_set_boundary}\r\n\r\n"
                ));
                for part in parts {
                    out.push_str(&format!("--{change_set_boundary}\r\n"));
                    write_part(&mut out, part);
                }
                out.push_str(&format!("--{change_set_boundary}--\r\n"));
            }
        }
    }
    out.push_str(&format!("--{batch_boundary}--\r\n"));
    out
}

fn write_part(out: &mut String, part: &ResponsePart) {
    out.push_str("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
    if let Some(content_id) = part.content_id {
        out.push_str(&format!("Content-ID: {content_id}\r\n"));
    }
    out.push_str("\r\n");
    let reason = axum::http::StatusCode::from_u16(part.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown");
    out.push_str(&format!("HTTP/1.1 {} {reason}\r\n", part.status));
    for (name, value) in &part.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    if let Some(body) = &part.body {
        out.push_str(body);
    }
    out.push_str("\r\n");
}

fn read_request(part: &str) -> Option<RequestPart> {
    let (mime_head, http) = split_head(part);
    let content_id = header(mime_head, "content-id").and_then(|id| id.parse().ok());

    let (request_line, rest) = http.split_once("\r\n").unwrap_or((http, ""));
    let mut tokens = request_line.split_whitespace();
    let method = tokens.next()?.to_string();
    let path = tokens.next()?.to_string();
    if !tokens.next()?.starts_with("HTTP/") {
        return None;
    }

    let (head, body) = split_head(rest);
    let headers = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Some(RequestPart {
        content_id,
        method,
        path,
        headers,
        body: body.trim().to_string(),
    })
}

fn sections<'a>(body: &'a str, boundary: &str) -> Vec<&'a str> {
    let delimiter = format!("--{boundary}");
    body.split(delimiter.as_str())
        .skip(1)
        .take_while(|section| !section.starts_with("--"))
        .filter_map(|section| section.split_once("\r\n").map(|(_, part)| part))
        .filter(|part| !part.trim().is_empty())
        .collect()
}

fn split_head(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix("\r\n") {
        return ("", rest);
    }
    match text.split_once("\r\n\r\n") {
        Some((head, rest)) => (head, rest),
        None => (text, ""),
    }
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = "--batch_A\r\n\
        Content-Type: multipart/mixed; boundary=\"changeset_B\"\r\n\
        \r\n\
        --changeset_B\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 1\r\n\
        \r\n\
        POST /api/data/v9.2/accounts HTTP/1.1\r\n\
        Content-Type: application/json\r\n\
        \r\n\
        {\"name\":\"Contoso\"}\r\n\
        --changeset_B\r\n\
        Content-Type: application/http\r\n\
        Content-Transfer-Encoding: binary\r\n\
        Content-ID: 2\r\n\
        \r\n\
        DELETE /api/data/v9.2/accounts(1) HTTP/1.1\r\n\
        \r\n\
        --changeset_B--\r\n\
        --batch_A--\r\n";

    #[test]
    fn reads_nested_change_set() {
        let entries = read_batch(REQUEST, "batch_A").unwrap();
        assert_eq!(entries.len(), 1);
        let BatchEntry::ChangeSet(parts) = &entries[0] else {
            panic!("expected change set");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_id, Some(1));
        assert_eq!(parts[0].method, "POST");
        assert_eq!(parts[0].path, "/api/data/v9.2/accounts");
        assert_eq!(parts[0].header("content-type"), Some("application/json"));
        assert_eq!(parts[0].body, "{\"name\":\"Contoso\"}");
        assert_eq!(parts[1].method, "DELETE");
        assert!(parts[1].body.is_empty());
    }

    #[test]
    fn boundary_is_unquoted() {
        assert_eq!(boundary("multipart/mixed; boundary=\"x\""), Some("x"));
        assert_eq!(boundary("application/json"), None);
    }

    #[test]
    fn writes_nested_response() {
        let parts = vec![ResponsePart {
            content_id: Some(1),
            status: 204,
            headers: vec![("OData-Version".to_string(), "4.0".to_string())],
            body: None,
        }];
        let text = write_batch(&[ResponseEntry::ChangeSet(parts)], "br", "cr");
        assert!(text.starts_with("--br\r\nContent-Type: multipart/mixed; boundary=cr\r\n\r\n--cr\r\n"));
        assert!(text.contains("Content-ID: 1\r\n\r\nHTTP/1.1 204 No Content\r\nOData-Version: 4.0\r\n\r\n\r\n"));
        assert!(text.ends_with("--cr--\r\n--br--\r\n"));
    }
}
