//! Template file compilation
//!
//! Scans one parsed file for `null-*` role attributes (and the
//! `<script null-ROLE>` blocks standing in for them), binds every role once,
//! and rewrites the markup into the skeleton served to clients.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::actions::ActionDecl;
use crate::api::UploadSpec;
use crate::error::{NullsError, Result};
use crate::exchange::{Exchange, Request};
use crate::html::{Document, NodeId, NodeKind};
use crate::script::{Binder, BoundScript, CallContext, Role, Source};

pub const ID_ATTR: &str = "null-id";
pub const ROLE_ATTR: &str = "null-role";
pub const TYPE_ATTR: &str = "null-type";
pub const API_ATTR: &str = "null-api";
pub const API_LIMIT_ATTR: &str = "null-api-limit";
pub const DUMMY_ATTR: &str = "null-dummy";

static SLOT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Server-side render roles of a slot
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub container: Option<BoundScript>,
    pub list: Option<BoundScript>,
    pub adder: Option<BoundScript>,
    pub data: Option<BoundScript>,
    pub attributes: Option<BoundScript>,
    pub arguments: Option<BoundScript>,
    pub condition: Option<BoundScript>,
}

impl Capabilities {
    /// Whether the render engine has to visit this slot
    pub fn is_render_slot(&self) -> bool {
        self.container.is_some()
            || self.list.is_some()
            || self.adder.is_some()
            || self.data.is_some()
            || self.attributes.is_some()
            || self.arguments.is_some()
            || self.condition.is_some()
    }
}

/// Roles only reached through client endpoints
#[derive(Debug, Clone, Default)]
pub struct ClientRoles {
    pub validator: Option<BoundScript>,
    pub parser: Option<Source>,
    pub request: Option<BoundScript>,
    pub handler: Option<Source>,
    pub loader: Option<BoundScript>,
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub id: String,
    /// Element in the template skeleton
    pub node: NodeId,
    pub caps: Capabilities,
    pub client: ClientRoles,
    /// Outer HTML of a `null-dummy` placeholder, removed from the skeleton
    pub dummy: Option<String>,
}

impl Slot {
    pub fn is_list(&self) -> bool {
        self.caps.list.is_some()
    }
}

/// One compiled `.html` file
#[derive(Debug)]
pub struct Template {
    /// Normalized path without extension (`root/main/feed`)
    pub path: String,
    /// Directory of the file; container slots live under it
    pub address: String,
    pub skeleton: Document,
    /// Slots in document order
    pub slots: Vec<Arc<Slot>>,
}

impl Template {
    pub fn slot(&self, id: &str) -> Option<&Arc<Slot>> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Address of a container slot: `<directory>/<slot id>`
    pub fn child_address(&self, slot: &str) -> String {
        join(&self.address, slot)
    }
}

pub(crate) fn join(address: &str, name: &str) -> String {
    if address.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", address, name)
    }
}

/// A compiled file plus the action parts it contributes
#[derive(Debug)]
pub struct Compiled {
    pub template: Template,
    pub actions: Vec<ActionDecl>,
}

/// Binding text of one role on one element
struct Declared {
    attr: Option<String>,
    block: Option<String>,
}

impl Declared {
    fn is_declared(&self) -> bool {
        self.attr.is_some() || self.block.is_some()
    }
}

struct FileCompiler<'b> {
    path: String,
    doc: Document,
    binder: &'b Binder,
    blocks: HashMap<(NodeId, Role), String>,
}

impl<'b> FileCompiler<'b> {
    fn invalid(&self, slot: &str, reason: impl Into<String>) -> NullsError {
        NullsError::InvalidSlot {
            template: self.path.clone(),
            slot: slot.to_string(),
            reason: reason.into(),
        }
    }

    fn declared(&self, node: NodeId, role: Role) -> Declared {
        Declared {
            attr: self.doc.attr(node, role.attribute()).map(str::to_string),
            block: self.blocks.get(&(node, role)).cloned(),
        }
    }

    fn bind(&self, slot: &str, node: NodeId, role: Role) -> Result<Option<BoundScript>> {
        let d = self.declared(node, role);
        if !d.is_declared() {
            return Ok(None);
        }
        let bound = self
            .binder
            .resolve(d.attr.as_deref(), d.block.as_deref(), role)
            .map_err(|e| self.invalid(slot, format!("{}: {}", role.attribute(), e)))?;
        match bound {
            Some(b) => Ok(Some(b)),
            None => Err(self.invalid(slot, format!("{} needs a binding", role.attribute()))),
        }
    }

    /// Bind a role, falling back to its default when undeclared
    fn bind_or_default(&self, slot: &str, node: NodeId, role: Role, wanted: bool) -> Result<Option<BoundScript>> {
        if !wanted {
            return Ok(None);
        }
        let d = self.declared(node, role);
        self.binder
            .resolve(d.attr.as_deref(), d.block.as_deref(), role)
            .map_err(|e| self.invalid(slot, format!("{}: {}", role.attribute(), e)))
    }

    fn bind_source(&self, slot: &str, node: NodeId, role: Role, wanted: bool) -> Result<Option<Source>> {
        if !wanted {
            return Ok(None);
        }
        let d = self.declared(node, role);
        self.binder
            .resolve_source(d.attr.as_deref(), d.block.as_deref(), role)
            .map_err(|e| self.invalid(slot, format!("{}: {}", role.attribute(), e)))
    }

    /// Lift `<script null-ROLE>` children out of the markup, keyed by parent
    fn collect_blocks(&mut self) {
        let scripts = self.doc.select(self.doc.root(), |el| {
            el.name == "script" && Role::ALL.iter().any(|r| el.attr(r.attribute()).is_some())
        });
        for script in scripts {
            let Some(parent) = self.doc.parent(script) else {
                continue;
            };
            let text: String = self
                .doc
                .children(script)
                .iter()
                .filter_map(|c| match self.doc.kind(*c) {
                    NodeKind::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            for role in Role::ALL {
                if self.doc.has_attr(script, role.attribute()) {
                    self.blocks.insert((parent, role), text.clone());
                }
            }
            self.doc.detach(script);
        }
    }

    async fn action(&self, node: NodeId, path: String) -> Result<ActionDecl> {
        let label = path.clone();
        let script = self.bind_or_default(&label, node, Role::ApiAction, true)?;
        let access = self.bind_or_default(&label, node, Role::ApiAccess, true)?;
        let upload = match self.bind_or_default(&label, node, Role::ApiUpload, true)? {
            Some(bound) => upload_spec(&bound)
                .await
                .map_err(|reason| self.invalid(&label, format!("null-api-upload: {}", reason)))?,
            None => None,
        };
        let limit = match self.doc.attr(node, API_LIMIT_ATTR) {
            Some(raw) => Some(
                raw.trim()
                    .trim_start_matches('#')
                    .parse::<u64>()
                    .map_err(|_| self.invalid(&label, "null-api-limit must be a byte count"))?,
            ),
            None => None,
        };
        Ok(ActionDecl {
            path,
            file: self.path.clone(),
            script,
            access,
            upload,
            limit,
        })
    }

    fn strip(&mut self, node: NodeId) {
        for role in Role::ALL {
            self.doc.remove_attr(node, role.attribute());
        }
        for attr in [API_ATTR, API_LIMIT_ATTR, DUMMY_ATTR] {
            self.doc.remove_attr(node, attr);
        }
    }
}

const SLOT_ROLES: [Role; 12] = [
    Role::Container,
    Role::List,
    Role::Adder,
    Role::Data,
    Role::Attributes,
    Role::Arguments,
    Role::Condition,
    Role::Validator,
    Role::Request,
    Role::Loader,
    Role::Parser,
    Role::Handler,
];

/// Evaluate an upload binding once into `field -> max count`
async fn upload_spec(bound: &BoundScript) -> std::result::Result<Option<UploadSpec>, String> {
    let exchange = Exchange::new(Request::get("/"));
    let value = bound
        .call(CallContext::new(&exchange, &[]))
        .await
        .map_err(|e| e.to_string())?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => map
            .into_iter()
            .map(|(field, count)| match count.as_u64() {
                Some(n) => Ok((field, n as usize)),
                None => Err(format!("count for '{}' must be a non-negative integer", field)),
            })
            .collect::<std::result::Result<UploadSpec, String>>()
            .map(Some),
        other => Err(format!("expected an object, got {}", other)),
    }
}

/// Compile one template file
pub async fn compile(path: &str, markup: &str, binder: &Binder) -> Result<Compiled> {
    let doc = Document::parse(markup).map_err(|e| NullsError::Markup {
        template: path.to_string(),
        details: e.to_string(),
    })?;
    let mut fc = FileCompiler {
        path: path.to_string(),
        doc,
        binder,
        blocks: HashMap::new(),
    };
    fc.collect_blocks();

    let mut slots = Vec::new();
    let mut actions = Vec::new();
    let mut dummies = Vec::new();
    let mut seen = HashSet::new();
    let mut generated = 0usize;
    // generated ids skip every id the author wrote
    let explicit: HashSet<String> = fc
        .doc
        .select(fc.doc.root(), |el| el.attr(ID_ATTR).is_some())
        .into_iter()
        .filter_map(|n| fc.doc.attr(n, ID_ATTR).map(|id| id.trim().to_string()))
        .collect();

    for node in fc.doc.select(fc.doc.root(), |_| true) {
        if let Some(api) = fc.doc.attr(node, API_ATTR).map(|p| p.trim().to_string()) {
            if api.is_empty() {
                return Err(fc.invalid("null-api", "action path is empty"));
            }
            actions.push(fc.action(node, api).await?);
        }

        let roles: Vec<Role> = SLOT_ROLES
            .into_iter()
            .filter(|r| fc.declared(node, *r).is_declared())
            .collect();
        if roles.is_empty() {
            fc.strip(node);
            continue;
        }

        let id = match fc.doc.attr(node, ID_ATTR) {
            Some(id) => id.trim().to_string(),
            None => loop {
                generated += 1;
                let candidate = format!("slot-{}", generated);
                if !explicit.contains(&candidate) {
                    break candidate;
                }
            },
        };
        if !SLOT_ID.is_match(&id) {
            return Err(fc.invalid(&id, "ids may only contain letters, digits, '-' and '_'"));
        }
        if !seen.insert(id.clone()) {
            return Err(NullsError::DuplicateSlot {
                template: path.to_string(),
                slot: id,
            });
        }

        let has = |r: Role| roles.contains(&r);
        let caps = Capabilities {
            container: fc.bind(&id, node, Role::Container)?,
            list: fc.bind(&id, node, Role::List)?,
            adder: fc.bind(&id, node, Role::Adder)?,
            data: fc.bind(&id, node, Role::Data)?,
            attributes: fc.bind(&id, node, Role::Attributes)?,
            arguments: fc.bind(&id, node, Role::Arguments)?,
            condition: fc.bind(&id, node, Role::Condition)?,
        };
        if caps.list.is_some() && caps.container.is_none() && caps.adder.is_none() {
            return Err(fc.invalid(&id, "null-list needs a container or an adder"));
        }
        let is_data = caps.data.is_some();
        let is_request = has(Role::Request) || has(Role::Handler);
        let client = ClientRoles {
            validator: fc.bind_or_default(&id, node, Role::Validator, is_data || has(Role::Validator))?,
            parser: fc.bind_source(&id, node, Role::Parser, is_data || has(Role::Parser))?,
            request: fc.bind_or_default(&id, node, Role::Request, is_request)?,
            handler: fc.bind_source(&id, node, Role::Handler, is_request)?,
            loader: fc.bind_or_default(&id, node, Role::Loader, has(Role::Loader))?,
        };

        let dummy = fc.doc.has_attr(node, DUMMY_ATTR);
        if dummy && caps.container.is_none() {
            return Err(fc.invalid(&id, "null-dummy is only valid on containers"));
        }

        let mut markers = Vec::new();
        if caps.container.is_some() {
            markers.push("container");
        }
        if is_data {
            markers.push("data");
        }
        if is_request {
            markers.push("request");
        }
        if client.loader.is_some() {
            markers.push("loader");
        }
        fc.strip(node);
        fc.doc.set_attr(node, ID_ATTR, id.clone());
        if !markers.is_empty() {
            fc.doc.set_attr(node, ROLE_ATTR, markers.join(" "));
        }
        if dummy {
            dummies.push(slots.len());
        }
        slots.push(Slot {
            id,
            node,
            caps,
            client,
            dummy: None,
        });
    }

    // dummies are captured after their own descendants were rewritten
    for index in dummies {
        let node = slots[index].node;
        slots[index].dummy = Some(fc.doc.outer_html(node));
        fc.doc.detach(node);
    }

    let address = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("").to_string();
    debug!(template = path, slots = slots.len(), actions = actions.len(), "compiled template");
    Ok(Compiled {
        template: Template {
            path: path.to_string(),
            address,
            skeleton: fc.doc,
            slots: slots.into_iter().map(Arc::new).collect(),
        },
        actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ModuleRegistry, ProviderTable};
    use pretty_assertions::assert_eq;

    fn binder() -> Binder {
        Binder::new(ModuleRegistry::new().into_shared(), ProviderTable::new(), ".")
    }

    async fn compile_ok(path: &str, markup: &str) -> Compiled {
        compile(path, markup, &binder()).await.unwrap()
    }

    #[tokio::test]
    async fn roles_become_client_markers() {
        let c = compile_ok(
            "root/index",
            r#"<main null-id="main" null-container="'feed'"></main><p null-data="'hi'" null-refresh></p>"#,
        )
        .await;
        let t = &c.template;
        assert_eq!(t.address, "root");
        assert_eq!(t.child_address("main"), "root/main");
        assert_eq!(
            t.skeleton.to_html(),
            r#"<main null-id="main" null-role="container"></main><p null-refresh null-id="slot-1" null-role="data"></p>"#
        );
        assert!(t.slot("slot-1").unwrap().client.parser.is_some());
    }

    #[tokio::test]
    async fn script_block_binds_to_its_parent() {
        let c = compile_ok(
            "root/index",
            "<div null-id=\"x\"><script null-data>let a = 1;\nreturn a + 1;</script></div>",
        )
        .await;
        let slot = c.template.slot("x").unwrap();
        assert!(matches!(slot.caps.data, Some(BoundScript::Inline { .. })));
        assert_eq!(c.template.skeleton.to_html(), r#"<div null-id="x" null-role="data"></div>"#);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let err = compile(
            "root/index",
            r#"<a null-id="x" null-data="1"></a><b null-id="x" null-data="2"></b>"#,
            &binder(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NullsError::DuplicateSlot { .. }));
    }

    #[tokio::test]
    async fn generated_ids_avoid_explicit_ones() {
        let c = compile_ok(
            "root/index",
            r#"<a null-data="1"></a><b null-id="slot-1" null-data="2"></b><i null-data="3"></i>"#,
        )
        .await;
        let ids: Vec<&str> = c.template.slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["slot-2", "slot-1", "slot-3"]);
    }

    #[tokio::test]
    async fn empty_container_is_an_argument_error() {
        let err = compile("root/index", r#"<div null-id="x" null-container></div>"#, &binder())
            .await
            .unwrap_err();
        assert!(matches!(err, NullsError::InvalidSlot { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Argument);
    }

    #[tokio::test]
    async fn api_elements_contribute_actions() {
        let c = compile_ok(
            "root/index",
            r#"<form null-api="/submit" null-api-action="'ok'" null-api-upload='#{"avatar": 1}' null-api-limit="1024"><input name="a"></form>"#,
        )
        .await;
        assert!(c.template.slots.is_empty());
        let decl = &c.actions[0];
        assert_eq!(decl.path, "/submit");
        assert_eq!(decl.limit, Some(1024));
        assert_eq!(decl.upload.as_ref().unwrap().get("avatar"), Some(&1));
        assert_eq!(c.template.skeleton.to_html(), r#"<form><input name="a"></form>"#);
    }

    #[tokio::test]
    async fn dummies_leave_the_skeleton() {
        let c = compile_ok(
            "root/main/feed",
            r#"<ul><li null-id="post" null-container="'post'" null-dummy>...</li><span null-id="more" null-loader="''" null-loads="post"></span></ul>"#,
        )
        .await;
        let post = c.template.slot("post").unwrap();
        assert_eq!(
            post.dummy.as_deref(),
            Some(r#"<li null-id="post" null-role="container">...</li>"#)
        );
        assert!(!c.template.skeleton.to_html().contains("<li"));
        assert!(c.template.slot("more").unwrap().client.loader.is_some());
    }
}
