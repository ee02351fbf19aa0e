//! Role attribute resolution
//!
//! Turns the raw text of a `null-*` attribute (or the `<script null-*>` block
//! standing in for it) into a [`BoundScript`]. Client-side roles (parser and
//! handler) resolve to [`Source`] text instead, served verbatim to the browser.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use super::{compile_inline, compile_source, BoundScript, ModuleRegistry, ProviderTable};
use crate::error::{NullsError, Result};

/// Every scriptable role a slot can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Container,
    List,
    Adder,
    Data,
    Attributes,
    Arguments,
    Condition,
    ApiAction,
    ApiAccess,
    ApiUpload,
    Validator,
    Request,
    Loader,
    Parser,
    Handler,
}

impl Role {
    pub const ALL: [Role; 15] = [
        Role::Container,
        Role::List,
        Role::Adder,
        Role::Data,
        Role::Attributes,
        Role::Arguments,
        Role::Condition,
        Role::ApiAction,
        Role::ApiAccess,
        Role::ApiUpload,
        Role::Validator,
        Role::Request,
        Role::Loader,
        Role::Parser,
        Role::Handler,
    ];

    pub fn attribute(self) -> &'static str {
        match self {
            Role::Container => "null-container",
            Role::List => "null-list",
            Role::Adder => "null-adder",
            Role::Data => "null-data",
            Role::Attributes => "null-attributes",
            Role::Arguments => "null-arguments",
            Role::Condition => "null-condition",
            Role::ApiAction => "null-api-action",
            Role::ApiAccess => "null-api-access",
            Role::ApiUpload => "null-api-upload",
            Role::Validator => "null-validator",
            Role::Request => "null-request",
            Role::Loader => "null-loader",
            Role::Parser => "null-parser",
            Role::Handler => "null-handler",
        }
    }

    /// Parser and handler run in the browser; their binding is source text
    pub fn is_source(self) -> bool {
        matches!(self, Role::Parser | Role::Handler)
    }

    /// Value used when the role is declared without a binding
    pub fn default_value(self) -> Option<Value> {
        match self {
            Role::Data | Role::Validator | Role::Loader => Some(json!("")),
            Role::Attributes => Some(json!({})),
            Role::Request => Some(Value::Null),
            _ => None,
        }
    }

    fn default_source(self) -> Option<&'static str> {
        match self {
            Role::Parser => Some("args[0]"),
            Role::Handler => Some("null"),
            _ => None,
        }
    }
}

/// Client-side program text, checked to compile at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub text: String,
}

/// What role resolution needs from the host
#[derive(Debug, Clone)]
pub struct Binder {
    pub modules: Arc<ModuleRegistry>,
    pub providers: ProviderTable,
    /// Template root, for `$path` client sources
    pub root: PathBuf,
}

impl Binder {
    pub fn new(modules: Arc<ModuleRegistry>, providers: ProviderTable, root: impl Into<PathBuf>) -> Self {
        Self {
            modules,
            providers,
            root: root.into(),
        }
    }

    pub fn resolve(&self, attr: Option<&str>, block: Option<&str>, role: Role) -> Result<Option<BoundScript>> {
        resolve(attr, block, role, &self.modules, &self.providers)
    }

    pub fn resolve_source(&self, attr: Option<&str>, block: Option<&str>, role: Role) -> Result<Option<Source>> {
        resolve_source(attr, block, role, &self.root)
    }
}

/// Pick the binding text: a non-empty attribute wins over the script block
fn pick<'a>(attr: Option<&'a str>, block: Option<&'a str>) -> Option<(&'a str, bool)> {
    let attr = attr.map(str::trim).filter(|a| !a.is_empty());
    let block = block.map(str::trim).filter(|b| !b.is_empty());
    attr.map(|a| (a, false)).or_else(|| block.map(|b| (b, true)))
}

/// Resolve a server-side role into its bound script
///
/// Returns `None` when nothing is bound and the role has no default.
pub fn resolve(
    attr: Option<&str>,
    block: Option<&str>,
    role: Role,
    modules: &Arc<ModuleRegistry>,
    providers: &ProviderTable,
) -> Result<Option<BoundScript>> {
    let Some((text, is_block)) = pick(attr, block) else {
        return Ok(role.default_value().map(BoundScript::Constant));
    };

    if let Some(path) = text.strip_prefix('$') {
        let path = path.trim();
        let script = modules.get(path).ok_or_else(|| NullsError::ModuleNotFound {
            path: path.to_string(),
        })?;
        return Ok(Some(BoundScript::External {
            path: path.to_string(),
            script,
        }));
    }

    if let Some(literal) = text.strip_prefix('#') {
        let value = serde_json::from_str(literal).unwrap_or_else(|_| Value::String(literal.to_string()));
        return Ok(Some(BoundScript::Constant(value)));
    }

    if !is_block {
        if let Some((prefix, provider, rest)) = providers.lookup(text) {
            return Ok(Some(BoundScript::Provider {
                prefix: prefix.to_string(),
                rest: rest.to_string(),
                provider,
            }));
        }
    }

    compile_inline(text, is_block, modules).map(Some)
}

/// Resolve a client-side role (parser / handler) into checked source text
pub fn resolve_source(attr: Option<&str>, block: Option<&str>, role: Role, root: &Path) -> Result<Option<Source>> {
    let text = match pick(attr, block) {
        Some((text, _)) => match text.strip_prefix('$') {
            Some(path) => read_source(root, path.trim())?,
            None => text.to_string(),
        },
        None => match role.default_source() {
            Some(text) => text.to_string(),
            None => return Ok(None),
        },
    };
    compile_source(&text)?;
    Ok(Some(Source { text }))
}

fn read_source(root: &Path, path: &str) -> Result<String> {
    let full = root.join(path);
    std::fs::read_to_string(&full).map_err(|e| NullsError::SourceNotFound {
        path: full.display().to_string(),
        reason: e.to_string(),
    })
}
