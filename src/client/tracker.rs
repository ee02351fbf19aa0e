//! Tracker payloads
//!
//! A request element lists the names it tracks in `null-tracks`; each name is
//! looked up along the container path, innermost container first, and the
//! value is read according to the kind of element found.

use std::collections::HashMap;

use crate::html::{Document, NodeId};

use super::{ClientError, ClientResult};

pub const TRACKER_ATTR: &str = "null-tracker";
pub const TRACKS_ATTR: &str = "null-tracks";
pub const ELEMENT_ATTR: &str = "null-element";

/// A file selected in a file input
#[derive(Debug, Clone, PartialEq)]
pub struct FileValue {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Form payload sent with every probe and request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerPayload {
    pub fields: Vec<(String, String)>,
    pub files: Vec<(String, FileValue)>,
}

impl TrackerPayload {
    /// Payload carrying only the page location
    pub fn new(path: &str, search: &str) -> Self {
        let mut payload = Self::default();
        payload.push("path", path);
        payload.push("search", search);
        payload
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    pub fn push_file(&mut self, name: &str, file: FileValue) {
        self.files.push((name.to_string(), file));
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `application/x-www-form-urlencoded` body of the text fields
    pub fn urlencoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }
}

/// Live control state the host has reported
#[derive(Debug, Default)]
pub(crate) struct Controls {
    pub values: HashMap<NodeId, String>,
    pub files: HashMap<NodeId, Vec<FileValue>>,
}

pub(crate) fn has_role(doc: &Document, node: NodeId, role: &str) -> bool {
    doc.attr(node, "null-role")
        .map(|r| r.split_whitespace().any(|r| r == role))
        .unwrap_or(false)
}

fn is_file_input(doc: &Document, node: NodeId) -> bool {
    doc.tag(node) == Some("input") && doc.attr(node, "type").map(str::to_ascii_lowercase).as_deref() == Some("file")
}

fn is_control(doc: &Document, node: NodeId) -> bool {
    matches!(doc.tag(node), Some("input" | "textarea" | "select"))
}

/// Current value of a form control
pub(crate) fn control_value(doc: &Document, controls: &Controls, node: NodeId) -> String {
    if let Some(v) = controls.values.get(&node) {
        return v.clone();
    }
    match doc.tag(node) {
        Some("textarea") => doc.text_content(node),
        Some("select") => {
            let options = doc.select(node, |el| el.name == "option");
            options
                .iter()
                .find(|o| doc.has_attr(**o, "selected"))
                .or(options.first())
                .map(|o| doc.attr(*o, "value").map(str::to_string).unwrap_or_else(|| doc.text_content(*o)))
                .unwrap_or_default()
        }
        _ => doc.attr(node, "value").unwrap_or_default().to_string(),
    }
}

/// Read a tracker element into the payload; `false` when it holds no value
fn extract(doc: &Document, controls: &Controls, node: NodeId, name: &str, payload: &mut TrackerPayload) -> bool {
    if has_role(doc, node, "data") {
        payload.push(name, doc.text_content(node).trim());
    } else if is_file_input(doc, node) {
        for file in controls.files.get(&node).into_iter().flatten() {
            payload.push_file(name, file.clone());
        }
    } else if is_control(doc, node) {
        payload.push(name, control_value(doc, controls, node));
    } else if has_role(doc, node, "container") {
        payload.push(name, doc.attr(node, ELEMENT_ATTR).unwrap_or_default());
    } else {
        // generic wrapper: the first control inside it
        let Some(inner) = doc.find_first(node, |el| matches!(el.name.as_str(), "input" | "textarea" | "select")) else {
            return false;
        };
        return extract(doc, controls, inner, name, payload);
    }
    true
}

/// Build the payload for `target` along `stack` (innermost container first)
pub(crate) fn collect(
    doc: &Document,
    controls: &Controls,
    stack: &[NodeId],
    target: NodeId,
    base: TrackerPayload,
) -> ClientResult<TrackerPayload> {
    let mut payload = base;
    let Some(tracks) = doc.attr(target, TRACKS_ATTR) else {
        return Ok(payload);
    };
    for name in tracks.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let found = stack.iter().any(|&scope| {
            let matched = if doc.attr(scope, TRACKER_ATTR) == Some(name) {
                Some(scope)
            } else {
                doc.find_first(scope, |el| el.attr(TRACKER_ATTR) == Some(name))
            };
            matched.is_some_and(|node| extract(doc, controls, node, name, &mut payload))
        });
        if !found {
            return Err(ClientError::MissingTracker {
                name: name.to_string(),
            });
        }
    }
    Ok(payload)
}
