//! Submitted form bodies
//!
//! Supports `application/x-www-form-urlencoded` and `multipart/form-data`.
//! Multipart file parts are spooled to [`NamedTempFile`]s owned by the
//! [`Form`]; dropping the form removes them.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::exchange::Request;

/// Field name → maximum number of files accepted for it
pub type UploadSpec = BTreeMap<String, usize>;

/// Which file parts a multipart body may carry
#[derive(Debug, Clone, Copy)]
enum Uploads<'a> {
    /// Declared fields only, up to their counts
    Declared(Option<&'a UploadSpec>),
    /// Any field, any count
    Any,
}

static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)boundary=(?:"([^"]+)"|([^;\s]+))"#).unwrap());
static PART_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i);\s*name="([^"]*)""#).unwrap());
static PART_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i);\s*filename="([^"]*)""#).unwrap());

#[derive(Error, Debug)]
pub enum FormError {
    #[error("malformed body: {0}")]
    Malformed(String),

    #[error("field '{field}' accepts at most {max} file(s)")]
    TooManyFiles { field: String, max: usize },

    #[error("unexpected file for field '{field}'")]
    UnexpectedFile { field: String },

    #[error("could not spool upload: {0}")]
    Io(#[from] std::io::Error),
}

impl FormError {
    /// Client mistakes, as opposed to server-side spooling failures
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FormError::Io(_))
    }
}

#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub file: NamedTempFile,
}

impl UploadedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Parsed submission: text fields plus spooled files
#[derive(Debug, Default)]
pub struct Form {
    pub fields: BTreeMap<String, Vec<String>>,
    pub files: BTreeMap<String, Vec<UploadedFile>>,
}

impl Form {
    /// Parse the request body according to its content type
    ///
    /// Bodies of other content types are left unparsed (empty form).
    pub fn parse(request: &Request, spec: Option<&UploadSpec>, upload_dir: &Path) -> Result<Self, FormError> {
        Self::parse_with(request, Uploads::Declared(spec), upload_dir)
    }

    /// Parse a tracker payload: file inputs may send any number of files
    pub fn parse_trackers(request: &Request, upload_dir: &Path) -> Result<Self, FormError> {
        Self::parse_with(request, Uploads::Any, upload_dir)
    }

    fn parse_with(request: &Request, uploads: Uploads<'_>, upload_dir: &Path) -> Result<Self, FormError> {
        let content_type = request.content_type().unwrap_or_default();
        let lower = content_type.to_ascii_lowercase();
        if lower.starts_with("multipart/form-data") {
            let boundary = BOUNDARY
                .captures(content_type)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| FormError::Malformed("missing multipart boundary".into()))?;
            spool_multipart(&request.body, &boundary, uploads, upload_dir)
        } else if lower.starts_with("application/x-www-form-urlencoded") {
            Ok(parse_urlencoded(&request.body))
        } else {
            Ok(Form::default())
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name)?.first().map(String::as_str)
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_default().push(value.into());
    }

    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Fields as JSON: single values as strings, repeated ones as arrays
    pub fn fields_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, values)| {
                let v = match values.as_slice() {
                    [one] => Value::String(one.clone()),
                    many => Value::Array(many.iter().cloned().map(Value::String).collect()),
                };
                (k.clone(), v)
            })
            .collect();
        Value::Object(map)
    }

    /// Files as JSON, always arrays per field
    pub fn files_json(&self) -> Value {
        let map: Map<String, Value> = self
            .files
            .iter()
            .map(|(k, files)| {
                let list = files
                    .iter()
                    .map(|f| {
                        json!({
                            "name": k,
                            "filename": f.filename,
                            "content_type": f.content_type,
                            "size": f.size,
                            "path": f.path().display().to_string(),
                        })
                    })
                    .collect();
                (k.clone(), Value::Array(list))
            })
            .collect();
        Value::Object(map)
    }
}

pub fn parse_urlencoded(body: &[u8]) -> Form {
    let mut form = Form::default();
    for (k, v) in url::form_urlencoded::parse(body) {
        form.push_field(k, v);
    }
    form
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Parse a multipart body, spooling file parts into `upload_dir`
///
/// Files are only accepted for fields named in `spec`, up to their count.
pub fn parse_multipart(
    body: &[u8],
    boundary: &str,
    spec: Option<&UploadSpec>,
    upload_dir: &Path,
) -> Result<Form, FormError> {
    spool_multipart(body, boundary, Uploads::Declared(spec), upload_dir)
}

fn spool_multipart(body: &[u8], boundary: &str, uploads: Uploads<'_>, upload_dir: &Path) -> Result<Form, FormError> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let separator = format!("\r\n--{}", boundary).into_bytes();
    let mut form = Form::default();

    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| FormError::Malformed("opening boundary not found".into()))?
        + delimiter.len();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(form);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(FormError::Malformed("expected CRLF after boundary".into()));
        }
        pos += 2;

        let head_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| FormError::Malformed("unterminated part headers".into()))?;
        let head = String::from_utf8_lossy(&body[pos..head_end]).into_owned();
        let content_start = head_end + 4;
        let content_end = find(body, &separator, content_start)
            .ok_or_else(|| FormError::Malformed("closing boundary not found".into()))?;
        let content = &body[content_start..content_end];
        pos = content_end + separator.len();

        let mut disposition = None;
        let mut content_type = None;
        for line in head.split("\r\n") {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "content-disposition" => disposition = Some(value.trim().to_string()),
                    "content-type" => content_type = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        let disposition = disposition
            .ok_or_else(|| FormError::Malformed("part without content-disposition".into()))?;
        let name = PART_NAME
            .captures(&disposition)
            .map(|c| c[1].to_string())
            .ok_or_else(|| FormError::Malformed("part without a name".into()))?;

        match PART_FILENAME.captures(&disposition) {
            None => form.push_field(name, String::from_utf8_lossy(content)),
            Some(c) => {
                let filename = c[1].to_string();
                // browsers send an empty part for an untouched file input
                if filename.is_empty() && content.is_empty() {
                    continue;
                }
                if let Uploads::Declared(spec) = uploads {
                    let max = spec
                        .and_then(|s| s.get(&name))
                        .copied()
                        .ok_or_else(|| FormError::UnexpectedFile { field: name.clone() })?;
                    let already = form.files.get(&name).map(Vec::len).unwrap_or(0);
                    if already >= max {
                        return Err(FormError::TooManyFiles { field: name, max });
                    }
                }
                std::fs::create_dir_all(upload_dir)?;
                let mut file = NamedTempFile::new_in(upload_dir)?;
                file.write_all(content)?;
                file.flush()?;
                form.files.entry(name).or_default().push(UploadedFile {
                    filename,
                    content_type: content_type.unwrap_or_else(|| "application/octet-stream".into()),
                    size: content.len() as u64,
                    file,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn body(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut out = String::new();
        for (name, filename, content) in parts {
            out.push_str("--XyZ\r\n");
            match filename {
                Some(f) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    name, f
                )),
                None => out.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)),
            }
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str("--XyZ--\r\n");
        out.into_bytes()
    }

    #[test]
    fn urlencoded_collects_repeated_fields() {
        let form = parse_urlencoded(b"tag=a&tag=b&name=Ada+L");
        assert_eq!(form.field("name"), Some("Ada L"));
        assert_eq!(form.fields_json()["tag"], json!(["a", "b"]));
    }

    #[test]
    fn multipart_fields_and_files() {
        let dir = TempDir::new().unwrap();
        let spec = UploadSpec::from([("avatar".to_string(), 1)]);
        let raw = body(&[("user", None, "ada"), ("avatar", Some("me.png"), "PNGDATA")]);
        let form = parse_multipart(&raw, "XyZ", Some(&spec), dir.path()).unwrap();

        assert_eq!(form.field("user"), Some("ada"));
        let file = &form.files["avatar"][0];
        assert_eq!(file.filename, "me.png");
        assert_eq!(file.size, 7);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"PNGDATA");
    }

    #[test]
    fn dropping_the_form_removes_uploads() {
        let dir = TempDir::new().unwrap();
        let spec = UploadSpec::from([("doc".to_string(), 2)]);
        let raw = body(&[("doc", Some("a.txt"), "a"), ("doc", Some("b.txt"), "b")]);
        let form = parse_multipart(&raw, "XyZ", Some(&spec), dir.path()).unwrap();
        assert_eq!(form.file_count(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
        drop(form);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn file_limits_are_enforced() {
        let dir = TempDir::new().unwrap();
        let raw = body(&[("doc", Some("a.txt"), "a")]);
        let err = parse_multipart(&raw, "XyZ", None, dir.path()).unwrap_err();
        assert!(matches!(err, FormError::UnexpectedFile { .. }));

        let spec = UploadSpec::from([("doc".to_string(), 1)]);
        let raw = body(&[("doc", Some("a.txt"), "a"), ("doc", Some("b.txt"), "b")]);
        let err = parse_multipart(&raw, "XyZ", Some(&spec), dir.path()).unwrap_err();
        assert!(matches!(err, FormError::TooManyFiles { max: 1, .. }));
        assert!(err.is_client_error());
        // the first file was spooled before the error and is already gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn tracker_payloads_accept_any_file_field() {
        let dir = TempDir::new().unwrap();
        let raw = body(&[("post", None, "7"), ("doc", Some("a.txt"), "a"), ("doc", Some("b.txt"), "b")]);
        let req = Request::post("/null-data/root/index/n").with_body("multipart/form-data; boundary=XyZ", raw);
        let form = Form::parse_trackers(&req, dir.path()).unwrap();
        assert_eq!(form.field("post"), Some("7"));
        assert_eq!(form.files["doc"].len(), 2);
        assert_eq!(form.files_json()["doc"][1]["filename"], "b.txt");

        // the same body is still rejected where no upload was declared
        assert!(matches!(
            Form::parse(&req, None, dir.path()).unwrap_err(),
            FormError::UnexpectedFile { .. }
        ));
    }

    #[test]
    fn truncated_multipart_is_malformed() {
        let dir = TempDir::new().unwrap();
        let raw = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nno end";
        let err = parse_multipart(raw, "XyZ", None, dir.path()).unwrap_err();
        assert!(matches!(err, FormError::Malformed(_)));
    }

    #[test]
    fn content_type_selects_the_parser() {
        let dir = TempDir::new().unwrap();
        let req = Request::post("/x").with_body("multipart/form-data; boundary=XyZ", body(&[("a", None, "1")]));
        let form = Form::parse(&req, None, dir.path()).unwrap();
        assert_eq!(form.field("a"), Some("1"));

        let req = Request::post("/x").with_body("multipart/form-data", "x");
        assert!(Form::parse(&req, None, dir.path()).is_err());

        let req = Request::post("/x").with_body("application/json", "{}");
        assert!(Form::parse(&req, None, dir.path()).unwrap().fields.is_empty());
    }
}
