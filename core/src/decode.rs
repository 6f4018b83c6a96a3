//! Change-set response decoder.
//!
//! # Design
//! The decoder works on `&str` slices of the received body and only allocates
//! for the values it hands back (the response body text) plus one delimiter
//! string per multipart level. A part is either a nested `multipart/mixed`
//! group, which is decoded recursively into the same flat list, or an
//! `application/http` response. Anything else is skipped: one malformed part
//! must not cost the caller the other outcomes.

use tracing::trace;
use uuid::Uuid;

use crate::result::OperationResult;

/// Response header carrying the URI of the affected record.
pub const ENTITY_ID_HEADER: &str = "OData-EntityId";

/// Nesting deeper than this is dropped rather than followed.
const MAX_DEPTH: usize = 4;

enum Part<'a> {
    Nested { boundary: &'a str, body: &'a str },
    Response(OperationResult),
}

/// Decode a batch response body into per-operation results.
///
/// `content_type` is the top-level `Content-Type` header. Without a boundary
/// parameter there is nothing to decode and the result is empty.
pub fn parse_batch_response(content_type: &str, body: &str) -> Vec<OperationResult> {
    let mut results = Vec::new();
    match boundary_param(content_type) {
        Some(boundary) => collect_parts(body, boundary, 0, &mut results),
        None => trace!(content_type, "no multipart boundary in response"),
    }
    results
}

/// The `boundary` parameter of a `multipart/*` content type, unquoted.
pub fn boundary_param(content_type: &str) -> Option<&str> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').trim())
        .filter(|boundary| !boundary.is_empty())
}

/// Record id in the parenthesized suffix of an entity URI, e.g.
/// `https://org/api/data/v9.2/accounts(<uuid>)`.
pub fn entity_id_from_uri(uri: &str) -> Option<Uuid> {
    let open = uri.rfind('(')?;
    let inner = &uri[open + 1..];
    let close = inner.find(')')?;
    Uuid::parse_str(inner[..close].trim()).ok()
}

fn collect_parts(body: &str, boundary: &str, depth: usize, out: &mut Vec<OperationResult>) {
    let delimiter = format!("--{boundary}");
    // The text before the first delimiter is preamble.
    for section in body.split(delimiter.as_str()).skip(1) {
        if section.starts_with("--") {
            break;
        }
        // Rest of the delimiter line (optional padding) ends at the first LF.
        let Some((_, part)) = section.split_once('\n') else {
            continue;
        };
        if part.trim().is_empty() {
            continue;
        }
        match parse_part(part) {
            Some(Part::Nested { boundary, body }) if depth < MAX_DEPTH => {
                collect_parts(body, boundary, depth + 1, out)
            }
            Some(Part::Nested { boundary, .. }) => {
                trace!(boundary, depth, "multipart nesting too deep, skipping part")
            }
            Some(Part::Response(result)) => out.push(result),
            None => trace!(len = part.len(), "skipping undecodable part"),
        }
    }
}

fn parse_part(part: &str) -> Option<Part<'_>> {
    let (head, body) = split_head(part);

    if let Some(content_type) = header_value(head, "Content-Type") {
        if media_type(content_type).eq_ignore_ascii_case("multipart/mixed") {
            let boundary = boundary_param(content_type)?;
            return Some(Part::Nested { boundary, body });
        }
    }

    let content_id = header_value(head, "Content-ID").and_then(parse_content_id);
    parse_http_response(body, content_id).map(Part::Response)
}

fn parse_http_response(text: &str, content_id: Option<u32>) -> Option<OperationResult> {
    let text = text.trim_start();
    let (status_line, rest) = text.split_once('\n').unwrap_or((text, ""));

    let mut tokens = status_line.split_whitespace();
    if !tokens.next()?.starts_with("HTTP/") {
        return None;
    }
    let status_code = tokens
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);

    let (headers, body) = split_head(rest);
    let entity_id = header_value(headers, ENTITY_ID_HEADER)
        .or_else(|| header_value(headers, "Location"))
        .and_then(entity_id_from_uri);

    let body = body.trim();
    Some(OperationResult {
        content_id,
        status_code,
        entity_id,
        response_body: (!body.is_empty()).then(|| body.to_string()),
    })
}

/// Split at the first blank line into (headers, remainder).
fn split_head(text: &str) -> (&str, &str) {
    if let Some(rest) = text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n')) {
        return ("", rest);
    }
    if let Some(end) = text.find("\r\n\r\n") {
        return (&text[..end], &text[end + 4..]);
    }
    if let Some(end) = text.find("\n\n") {
        return (&text[..end], &text[end + 2..]);
    }
    (text, "")
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

fn parse_content_id(value: &str) -> Option<u32> {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_1: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
    const ID_2: &str = "9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d";

    fn http_part(content_id: &str, status_line: &str, headers: &str, body: &str) -> String {
        format!(
            "Content-Type: application/http\r\n\
             Content-Transfer-Encoding: binary\r\n\
             Content-ID: {content_id}\r\n\
             \r\n\
             {status_line}\r\n\
             {headers}\r\n\
             {body}\r\n"
        )
    }

    fn entity_header(id: &str) -> String {
        format!("OData-EntityId: https://org.example.com/api/data/v9.2/accounts({id})\r\n")
    }

    fn nested(parts: &[String]) -> String {
        let mut body = String::from("--batchresponse_1\r\n");
        body.push_str("Content-Type: multipart/mixed; boundary=changesetresponse_1\r\n\r\n");
        for part in parts {
            body.push_str("--changesetresponse_1\r\n");
            body.push_str(part);
        }
        body.push_str("--changesetresponse_1--\r\n");
        body.push_str("--batchresponse_1--\r\n");
        body
    }

    fn flat(parts: &[String]) -> String {
        let mut body = String::new();
        for part in parts {
            body.push_str("--batchresponse_1\r\n");
            body.push_str(part);
        }
        body.push_str("--batchresponse_1--\r\n");
        body
    }

    const CONTENT_TYPE: &str = "multipart/mixed; boundary=batchresponse_1";

    #[test]
    fn two_no_content_parts_with_entity_ids() {
        let parts = [
            http_part("1", "HTTP/1.1 204 No Content", &entity_header(ID_1), ""),
            http_part("2", "HTTP/1.1 204 No Content", &entity_header(ID_2), ""),
        ];
        let results = parse_batch_response(CONTENT_TYPE, &nested(&parts));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content_id, Some(1));
        assert_eq!(results[0].entity_id, Some(Uuid::parse_str(ID_1).unwrap()));
        assert_eq!(results[1].content_id, Some(2));
        assert_eq!(results[1].entity_id, Some(Uuid::parse_str(ID_2).unwrap()));
        assert!(results.iter().all(OperationResult::is_success));
        assert!(results.iter().all(|r| r.response_body.is_none()));
    }

    #[test]
    fn nested_and_flat_decode_identically() {
        let parts = [
            http_part("1", "HTTP/1.1 201 Created", &entity_header(ID_1), "{\"a\":1}"),
            http_part("2", "HTTP/1.1 204 No Content", "", ""),
        ];
        assert_eq!(
            parse_batch_response(CONTENT_TYPE, &nested(&parts)),
            parse_batch_response(CONTENT_TYPE, &flat(&parts))
        );
    }

    #[test]
    fn preserves_server_order() {
        let parts = [
            http_part("2", "HTTP/1.1 204 No Content", "", ""),
            http_part("1", "HTTP/1.1 204 No Content", "", ""),
        ];
        let results = parse_batch_response(CONTENT_TYPE, &nested(&parts));
        let ids: Vec<_> = results.iter().map(|r| r.content_id).collect();
        assert_eq!(ids, vec![Some(2), Some(1)]);
    }

    #[test]
    fn missing_boundary_yields_nothing() {
        assert!(parse_batch_response("application/json", "{}").is_empty());
        assert!(parse_batch_response("multipart/mixed; boundary=\"\"", "--x--").is_empty());
    }

    #[test]
    fn malformed_part_is_skipped() {
        let parts = [
            http_part("1", "HTTP/1.1 204 No Content", "", ""),
            "Content-Type: text/plain\r\n\r\nnot an http response\r\n".to_string(),
            http_part("3", "HTTP/1.1 204 No Content", "", ""),
        ];
        let results = parse_batch_response(CONTENT_TYPE, &nested(&parts));
        let ids: Vec<_> = results.iter().map(|r| r.content_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[test]
    fn bad_status_code_and_content_id_degrade() {
        let parts = [http_part("abc", "HTTP/1.1 XYZ Weird", "", ""), http_part("", "HTTP/1.1", "", "")];
        let results = parse_batch_response(CONTENT_TYPE, &flat(&parts));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content_id, None);
        assert_eq!(results[0].status_code, 0);
        assert!(!results[0].is_success());
        assert_eq!(results[1].status_code, 0);
    }

    #[test]
    fn missing_content_id_header() {
        let part = "Content-Type: application/http\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n".to_string();
        let results = parse_batch_response(CONTENT_TYPE, &flat(&[part]));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content_id, None);
        assert_eq!(results[0].status_code, 204);
    }

    #[test]
    fn error_part_keeps_body() {
        let body = r#"{"error":{"code":"0x0","message":"boom"}}"#;
        let parts = [http_part(
            "1",
            "HTTP/1.1 400 Bad Request",
            "Content-Type: application/json; odata.metadata=minimal\r\n",
            body,
        )];
        let results = parse_batch_response(CONTENT_TYPE, &flat(&parts));
        assert_eq!(results[0].status_code, 400);
        assert_eq!(results[0].response_body.as_deref(), Some(body));
        assert_eq!(results[0].error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn entity_id_parsing() {
        assert_eq!(
            entity_id_from_uri(&format!("https://org/api/data/v9.2/accounts({ID_1})")),
            Some(Uuid::parse_str(ID_1).unwrap())
        );
        assert_eq!(entity_id_from_uri("https://org/api/data/v9.2/accounts"), None);
        assert_eq!(
            entity_id_from_uri("https://org/api/data/v9.2/contacts(emailaddress1='a@x.com')"),
            None
        );
        assert_eq!(entity_id_from_uri("accounts(unterminated"), None);
    }

    #[test]
    fn location_header_is_a_fallback() {
        let headers = format!("Location: https://org/api/data/v9.2/accounts({ID_2})\r\n");
        let parts = [http_part("1", "HTTP/1.1 201 Created", &headers, "")];
        let results = parse_batch_response(CONTENT_TYPE, &flat(&parts));
        assert_eq!(results[0].entity_id, Some(Uuid::parse_str(ID_2).unwrap()));
    }

    #[test]
    fn boundary_param_variants() {
        assert_eq!(boundary_param("multipart/mixed; boundary=abc"), Some("abc"));
        assert_eq!(boundary_param("multipart/mixed;boundary=\"abc\""), Some("abc"));
        assert_eq!(
            boundary_param("multipart/mixed; charset=utf-8; BOUNDARY=abc"),
            Some("abc")
        );
        assert_eq!(boundary_param("multipart/mixed"), None);
        assert_eq!(boundary_param("multipart/mixed; boundary=  "), None);
    }

    #[test]
    fn stops_at_close_delimiter() {
        let mut body = flat(&[http_part("1", "HTTP/1.1 204 No Content", "", "")]);
        body.push_str("--batchresponse_1\r\n");
        body.push_str(&http_part("9", "HTTP/1.1 204 No Content", "", ""));
        let results = parse_batch_response(CONTENT_TYPE, &body);
        assert_eq!(results.len(), 1);
    }
}
