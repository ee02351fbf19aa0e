//! # Script Binding
//!
//! Every role attribute resolves, once at load time, into a [`BoundScript`]:
//!
//! | Raw value | Variant | Behaviour |
//! |-----------|---------|-----------|
//! | `$path` | [`BoundScript::External`] | native [`Script`] from the [`ModuleRegistry`] |
//! | `#literal` | [`BoundScript::Constant`] | JSON literal, or the text itself |
//! | `prefix:rest` | [`BoundScript::Provider`] | dispatched to a registered [`Provider`] |
//! | anything else | [`BoundScript::Inline`] | compiled inline expression / block |
//!
//! Inline bindings run in a sandboxed expression language: they see the
//! request and the accumulated arguments, and can only reach host code
//! through `call("module", ...)` against the module registry.
//!
//! ```rust
//! use nulls::script::{compile_inline, ModuleRegistry};
//!
//! let modules = ModuleRegistry::new().into_shared();
//! assert!(compile_inline("len(args) > 0 ? args[0] : 'none'", false, &modules).is_ok());
//! assert!(compile_inline("1 +", false, &modules).is_err());
//! ```

mod ast;
pub mod binding;
mod eval;
mod lexer;
mod parser;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{NullsError, Result};
use crate::exchange::Exchange;

pub use ast::Program;
pub use binding::{resolve, resolve_source, Binder, Role, Source};
pub use eval::{is_truthy, stringify, type_name};

// ============================================================================
// CALL CONTEXT
// ============================================================================

/// What a script sees when it is invoked
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub exchange: &'a Exchange,
    pub args: &'a [Value],
}

impl<'a> CallContext<'a> {
    pub fn new(exchange: &'a Exchange, args: &'a [Value]) -> Self {
        Self { exchange, args }
    }

    pub fn arg(&self, index: usize) -> Option<&'a Value> {
        self.args.get(index)
    }
}

// ============================================================================
// NATIVE SCRIPTS AND PROVIDERS
// ============================================================================

/// Host code callable from templates (`$path` references)
#[async_trait]
pub trait Script: Send + Sync {
    async fn call(&self, cx: CallContext<'_>) -> Result<Value>;
}

/// Wraps a synchronous closure as a [`Script`]
pub struct ScriptFn<F>(pub F);

#[async_trait]
impl<F> Script for ScriptFn<F>
where
    F: Fn(CallContext<'_>) -> Result<Value> + Send + Sync,
{
    async fn call(&self, cx: CallContext<'_>) -> Result<Value> {
        (self.0)(cx)
    }
}

/// Shorthand for `Arc::new(ScriptFn(f))`
pub fn script_fn<F>(f: F) -> Arc<dyn Script>
where
    F: Fn(CallContext<'_>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(ScriptFn(f))
}

/// Host-supplied value source for `prefix:rest` bindings
#[async_trait]
pub trait Provider: Send + Sync {
    async fn provide(&self, rest: &str, cx: CallContext<'_>) -> Result<Value>;
}

/// Named native scripts reachable through `$path` and `call(...)`
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Script>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, script: Arc<dyn Script>) {
        self.modules.insert(path.into(), script);
    }

    /// Builder form of [`ModuleRegistry::register`]
    pub fn with(mut self, path: impl Into<String>, script: Arc<dyn Script>) -> Self {
        self.register(path, script);
        self
    }

    pub fn get(&self, path: &str) -> Option<Arc<dyn Script>> {
        self.modules.get(path).cloned()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("ModuleRegistry").field("modules", &names).finish()
    }
}

/// Provider lookup by prefix (`env:HOME` dispatches `HOME` to `env`)
#[derive(Default, Clone)]
pub struct ProviderTable {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(prefix.into(), provider);
    }

    pub fn with(mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(prefix, provider);
        self
    }

    /// Split at the first ':' and match the head against registered prefixes
    pub fn lookup<'t>(&self, text: &'t str) -> Option<(&str, Arc<dyn Provider>, &'t str)> {
        let (head, rest) = text.split_once(':')?;
        self.providers
            .get_key_value(head)
            .map(|(prefix, provider)| (prefix.as_str(), Arc::clone(provider), rest))
    }
}

impl fmt::Debug for ProviderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTable")
            .field("prefixes", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// BOUND SCRIPT
// ============================================================================

/// A role's callable, built once at load time and shared across requests
#[derive(Clone)]
pub enum BoundScript {
    External {
        path: String,
        script: Arc<dyn Script>,
    },
    Constant(Value),
    Provider {
        prefix: String,
        rest: String,
        provider: Arc<dyn Provider>,
    },
    Inline {
        program: Arc<Program>,
        modules: Arc<ModuleRegistry>,
    },
}

impl BoundScript {
    pub async fn call(&self, cx: CallContext<'_>) -> Result<Value> {
        match self {
            BoundScript::External { script, .. } => script.call(cx).await,
            BoundScript::Constant(value) => Ok(value.clone()),
            BoundScript::Provider { rest, provider, .. } => provider.provide(rest, cx).await,
            BoundScript::Inline { program, modules } => eval::run(program, cx, modules).await,
        }
    }

    /// Evaluate and coerce to JS-style truthiness
    pub async fn test(&self, cx: CallContext<'_>) -> Result<bool> {
        Ok(is_truthy(&self.call(cx).await?))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, BoundScript::Constant(_))
    }
}

impl fmt::Debug for BoundScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundScript::External { path, .. } => write!(f, "External(${})", path),
            BoundScript::Constant(v) => write!(f, "Constant({})", v),
            BoundScript::Provider { prefix, rest, .. } => write!(f, "Provider({}:{})", prefix, rest),
            BoundScript::Inline { program, .. } => write!(f, "Inline({:?})", program),
        }
    }
}

/// Compile inline text into a bound script closed over `modules`
pub fn compile_inline(src: &str, block: bool, modules: &Arc<ModuleRegistry>) -> Result<BoundScript> {
    let program = if block {
        parser::compile_block(src)?
    } else {
        parser::compile_expression(src)?
    };
    Ok(BoundScript::Inline {
        program: Arc::new(program),
        modules: Arc::clone(modules),
    })
}

/// Compile client source (parser / handler) that runs without a request
pub fn compile_source(src: &str) -> Result<Program> {
    let trimmed = src.trim();
    if trimmed.contains(';') || trimmed.starts_with("let ") || trimmed.starts_with("return ") {
        parser::compile_block(trimmed)
    } else {
        parser::compile_expression(trimmed)
    }
}

/// Run a compiled client program with `args` and no host modules
pub async fn run_source(program: &Program, exchange: &Exchange, args: &[Value]) -> Result<Value> {
    let modules = ModuleRegistry::new();
    eval::run(program, CallContext::new(exchange, args), &modules).await
}

/// Wrap a failure raised outside the engine
pub fn failure(details: impl fmt::Display) -> NullsError {
    NullsError::script(details.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Request;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Provider for Upper {
        async fn provide(&self, rest: &str, _cx: CallContext<'_>) -> Result<Value> {
            Ok(Value::String(rest.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn each_variant_calls_through() {
        let ex = Exchange::new(Request::get("/"));
        let args = [json!(2)];
        let cx = CallContext::new(&ex, &args);

        let ext = BoundScript::External {
            path: "double".into(),
            script: script_fn(|cx| Ok(json!(cx.arg(0).and_then(Value::as_i64).unwrap_or(0) * 2))),
        };
        assert_eq!(ext.call(cx).await.unwrap(), json!(4));

        let constant = BoundScript::Constant(json!("x"));
        assert_eq!(constant.call(cx).await.unwrap(), json!("x"));

        let table = ProviderTable::new().with("up", Arc::new(Upper));
        let (prefix, provider, rest) = table.lookup("up:abc").unwrap();
        let bound = BoundScript::Provider {
            prefix: prefix.to_string(),
            rest: rest.to_string(),
            provider,
        };
        assert_eq!(bound.call(cx).await.unwrap(), json!("ABC"));

        let modules = ModuleRegistry::new().into_shared();
        let inline = compile_inline("args[0] + 1", false, &modules).unwrap();
        assert_eq!(inline.call(cx).await.unwrap(), json!(3));
    }

    #[test]
    fn provider_lookup_requires_colon() {
        let table = ProviderTable::new().with("env", Arc::new(Upper));
        assert!(table.lookup("env:HOME").is_some());
        assert!(table.lookup("environment").is_none());
        assert!(table.lookup("other:x").is_none());
    }

    #[test]
    fn source_picks_block_form_for_statements() {
        assert!(matches!(compile_source("args[0]").unwrap(), Program::Expression(_)));
        assert!(matches!(
            compile_source("let x = args[0]; return x;").unwrap(),
            Program::Block(_)
        ));
    }
}
