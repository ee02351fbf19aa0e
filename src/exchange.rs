//! Framework-agnostic request/response pair
//!
//! The HTTP server itself is an external collaborator: it converts its
//! requests into [`Request`] and writes back the returned [`Response`].
//! An [`Exchange`] is what scripts observe while one request is served.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::api::form::Form;

// ============================================================================
// STATUS CODES
// ============================================================================

pub const OK: u16 = 200;
pub const BAD_REQUEST: u16 = 400;
pub const FORBIDDEN: u16 = 403;
pub const NOT_FOUND: u16 = 404;
pub const LENGTH_REQUIRED: u16 = 411;
pub const PAYLOAD_TOO_LARGE: u16 = 413;
pub const INTERNAL_ERROR: u16 = 500;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Upper-case method
    pub method: String,
    pub path: String,
    /// Raw query string without '?'
    pub query: String,
    /// Lower-case header names
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build from a method and a `path?query` target
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: query.to_string(),
            ..Default::default()
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: &str) -> Self {
        Self::new("POST", target)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body and a matching `content-length`
    pub fn with_body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.headers
            .insert("content-length".to_string(), self.body.len().to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Declared length; `None` when missing or unparsable
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn query_pairs(&self) -> BTreeMap<String, String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn cookies(&self) -> BTreeMap<String, String> {
        self.header("cookie")
            .map(|raw| {
                raw.split(';')
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(OK, "text/plain; charset=utf-8", body)
    }

    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(OK, "text/html; charset=utf-8", body)
    }

    pub fn javascript(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(OK, "text/javascript; charset=utf-8", body)
    }

    pub fn json(value: &Value) -> Self {
        Self::new(OK, "application/json", value.to_string())
    }

    /// Bodyless error with a generic reason phrase
    pub fn status(status: u16) -> Self {
        Self::new(status, "text/plain; charset=utf-8", reason(status))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        OK => "OK",
        BAD_REQUEST => "Bad Request",
        FORBIDDEN => "Forbidden",
        NOT_FOUND => "Not Found",
        LENGTH_REQUIRED => "Length Required",
        PAYLOAD_TOO_LARGE => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

// ============================================================================
// EXCHANGE
// ============================================================================

/// Response changes requested by scripts while the request is served
#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<u16>,
    headers: Vec<(String, String)>,
}

/// One request being served, plus the response state scripts may touch
#[derive(Debug)]
pub struct Exchange {
    request: Request,
    form: Form,
    response: Mutex<ResponseParts>,
    json: OnceCell<Value>,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self::with_form(request, Form::default())
    }

    pub fn with_form(request: Request, form: Form) -> Self {
        Self {
            request,
            form,
            response: Mutex::new(ResponseParts::default()),
            json: OnceCell::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Attach a parsed body; the cached request JSON is rebuilt on next use
    pub fn set_form(&mut self, form: Form) {
        self.form = form;
        self.json = OnceCell::new();
    }

    /// Request as seen by inline bindings (built once)
    pub fn request_json(&self) -> &Value {
        self.json.get_or_init(|| {
            let headers: Map<String, Value> = self
                .request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            json!({
                "method": self.request.method,
                "path": self.request.path,
                "query": self.request.query_pairs(),
                "headers": headers,
                "cookies": self.request.cookies(),
                "fields": self.form.fields_json(),
                "files": self.form.files_json(),
            })
        })
    }

    pub fn set_status(&self, status: u16) {
        self.response.lock().status = Some(status);
    }

    pub fn set_header(&self, name: &str, value: impl Into<String>) {
        self.response
            .lock()
            .headers
            .push((name.to_ascii_lowercase(), value.into()));
    }

    /// Apply script-requested status and headers to `response`
    pub fn finish(&self, mut response: Response) -> Response {
        let parts = self.response.lock();
        if let Some(status) = parts.status {
            response.status = status;
        }
        for (k, v) in &parts.headers {
            response.headers.retain(|(h, _)| h != k || k == "set-cookie");
            response.headers.push((k.clone(), v.clone()));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_splits_path_and_query() {
        let req = Request::get("/chat?room=general&x=1");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.query_pairs().get("room").map(String::as_str), Some("general"));
    }

    #[test]
    fn cookies_and_headers_are_case_insensitive() {
        let req = Request::get("/").with_header("Cookie", "token=abc; theme=dark");
        assert_eq!(req.cookies().get("token").map(String::as_str), Some("abc"));
        assert!(req.header("COOKIE").is_some());
    }

    #[test]
    fn content_length_must_parse() {
        let req = Request::post("/x").with_header("content-length", "abc");
        assert_eq!(req.content_length(), None);
        let req = Request::post("/x").with_body("text/plain", "hello");
        assert_eq!(req.content_length(), Some(5));
    }

    #[test]
    fn finish_applies_script_overrides() {
        let ex = Exchange::new(Request::get("/"));
        ex.set_status(201);
        ex.set_header("Content-Type", "application/x-custom");
        let res = ex.finish(Response::text("ok"));
        assert_eq!(res.status, 201);
        assert_eq!(res.header("content-type"), Some("application/x-custom"));
        assert_eq!(res.headers.len(), 1);
    }

    #[test]
    fn request_json_exposes_query_and_path() {
        let ex = Exchange::new(Request::get("/a?b=c"));
        let json = ex.request_json();
        assert_eq!(json["path"], "/a");
        assert_eq!(json["query"]["b"], "c");
        assert_eq!(json["method"], "GET");
    }
}
