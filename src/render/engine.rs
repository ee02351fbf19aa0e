//! Recursive slot resolution
//!
//! For each slot, in document order:
//! 1. the argument provider extends the context
//! 2. a false condition skips the slot
//! 3. container, data, attribute-set, then adder apply
//!
//! Container and adder scripts return a variant name; the variant is the
//! template `<address>/<variant>` rendered recursively with the extended
//! context and grafted as nodes, so page hooks see the whole tree.
//!
//! Every descent lengthens the address, so template chains end at
//! `max_depth`. The active template stack only trips for callers that
//! re-enter a template already on it.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{NoHooks, RenderContext, RenderHooks};
use crate::config::ROOT_ADDRESS;
use crate::error::{NullsError, Result};
use crate::html::Document;
use crate::script::{stringify, type_name, BoundScript};
use crate::store::{join, Slot, Template, TemplateStore, ID_ATTR, TYPE_ATTR};

#[derive(Clone)]
pub struct Renderer {
    store: Arc<TemplateStore>,
    hooks: Arc<dyn RenderHooks>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("templates", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Rendered output of a container or adder
struct Expansion {
    docs: Vec<Document>,
    /// Variant of a non-list expansion
    variant: Option<String>,
}

fn variant_name(value: Value) -> Result<String> {
    match value {
        Value::String(s) if !s.is_empty() && !s.contains('/') && s != "." && s != ".." => Ok(s),
        other => Err(NullsError::ScriptContract {
            expected: "a variant name",
            found: other.to_string(),
        }),
    }
}

fn valid_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

impl Renderer {
    pub fn new(store: Arc<TemplateStore>) -> Self {
        Self {
            store,
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RenderHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    pub fn hooks(&self) -> &Arc<dyn RenderHooks> {
        &self.hooks
    }

    /// Render one template without page hooks
    #[instrument(skip(self, ctx), fields(args = ctx.args().len()))]
    pub async fn render(&self, path: &str, ctx: &RenderContext) -> Result<String> {
        let mut stack = Vec::new();
        self.render_template(path.to_string(), ctx.clone(), &mut stack)
            .await
            .map(|doc| doc.to_html())
    }

    /// Render the variant `token` of the container at `address`
    pub async fn render_fragment(&self, address: &str, token: &str, ctx: &RenderContext) -> Result<String> {
        self.render(&join(address, token), ctx).await
    }

    /// Full page: the root variant wrapped in the host hooks
    #[instrument(skip(self, ctx))]
    pub async fn render_page(&self, ctx: &RenderContext) -> Result<String> {
        let config = self.store.config();
        let path = config.root_template();
        let template = Arc::clone(self.store.template(&path)?);
        let mut doc = template.skeleton.clone();

        self.hooks.preprocess(&mut doc, ctx).await?;
        let mut stack = vec![path];
        self.resolve_slots(&template, &mut doc, ctx, &mut stack).await?;
        self.hooks.postprocess(&mut doc, ctx).await?;

        if let Some(body) = doc.find_first(doc.root(), |el| el.name == "body") {
            doc.set_attr(body, ID_ATTR, ROOT_ADDRESS);
            doc.set_attr(body, TYPE_ATTR, config.root_type.clone());
        }
        Ok(self.hooks.postprocess_text(doc.to_html(), ctx))
    }

    fn render_template<'a>(
        &'a self,
        path: String,
        ctx: RenderContext,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move {
            if stack.contains(&path) {
                let mut cycle = stack.clone();
                cycle.push(path);
                return Err(NullsError::TemplateCycle {
                    cycle: cycle.join(" -> "),
                });
            }
            let max_depth = self.store.config().max_depth;
            if stack.len() >= max_depth {
                return Err(NullsError::DepthExceeded {
                    path,
                    depth: max_depth,
                });
            }

            let template = Arc::clone(self.store.template(&path)?);
            let mut doc = template.skeleton.clone();
            stack.push(path);
            let resolved = self.resolve_slots(&template, &mut doc, &ctx, stack).await;
            stack.pop();
            resolved?;
            Ok(doc)
        })
    }

    async fn resolve_slots(
        &self,
        template: &Template,
        doc: &mut Document,
        ctx: &RenderContext,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        for slot in &template.slots {
            // replaced by an earlier slot, or a dummy
            if !doc.is_connected(slot.node) || !slot.caps.is_render_slot() {
                continue;
            }
            self.resolve_slot(template, slot, doc, ctx, stack).await?;
        }
        Ok(())
    }

    async fn resolve_slot(
        &self,
        template: &Template,
        slot: &Slot,
        doc: &mut Document,
        ctx: &RenderContext,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let caps = &slot.caps;
        let node = slot.node;

        let ctx = match &caps.arguments {
            Some(args) => ctx.extend(args.call(ctx.call()).await?),
            None => ctx.clone(),
        };

        if let Some(condition) = &caps.condition {
            if !condition.test(ctx.call()).await? {
                debug!(template = %template.path, slot = %slot.id, "condition false, slot skipped");
                return Ok(());
            }
        }

        let mut applied = false;

        if let Some(container) = &caps.container {
            let out = self.expand(template, slot, container, &ctx, stack).await?;
            doc.clear_children(node);
            for child in &out.docs {
                doc.graft(node, child, None);
            }
            if let Some(variant) = out.variant {
                doc.set_attr(node, TYPE_ATTR, variant);
            }
            applied = true;
        }

        if let Some(data) = &caps.data {
            let value = data.call(ctx.call()).await?;
            let text = if value.is_null() { String::new() } else { stringify(&value) };
            doc.set_text(node, &text);
            applied = true;
        }

        if let Some(attributes) = &caps.attributes {
            match attributes.call(ctx.call()).await? {
                Value::Object(map) => {
                    for (name, value) in map {
                        if !valid_attr_name(&name) {
                            return Err(NullsError::ScriptContract {
                                expected: "an attribute name",
                                found: name,
                            });
                        }
                        match value {
                            Value::Null | Value::Bool(false) => {
                                doc.remove_attr(node, &name);
                            }
                            Value::Bool(true) => doc.set_attr(node, &name, ""),
                            other => doc.set_attr(node, &name, stringify(&other)),
                        }
                    }
                }
                Value::Null => {}
                other => {
                    return Err(NullsError::ScriptContract {
                        expected: "an attribute object",
                        found: type_name(&other).to_string(),
                    })
                }
            }
            applied = true;
        }

        if let Some(adder) = &caps.adder {
            let out = self.expand(template, slot, adder, &ctx, stack).await?;
            for child in &out.docs {
                doc.graft(node, child, None);
            }
            applied = true;
        }

        if !applied {
            return Err(NullsError::UnreachableSlot {
                template: template.path.clone(),
                slot: slot.id.clone(),
            });
        }
        Ok(())
    }

    /// Render the variant(s) a container or adder script selects
    async fn expand(
        &self,
        template: &Template,
        slot: &Slot,
        script: &BoundScript,
        ctx: &RenderContext,
        stack: &mut Vec<String>,
    ) -> Result<Expansion> {
        let address = template.child_address(&slot.id);

        let Some(list) = &slot.caps.list else {
            let variant = variant_name(script.call(ctx.call()).await?)?;
            let child = self
                .render_template(join(&address, &variant), ctx.clone(), stack)
                .await?;
            return Ok(Expansion {
                docs: vec![child],
                variant: Some(variant),
            });
        };

        let items = match list.call(ctx.call()).await? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            other => {
                return Err(NullsError::NotIterable {
                    slot: format!("{}/{}", template.path, slot.id),
                    found: type_name(&other).to_string(),
                })
            }
        };
        debug!(slot = %slot.id, items = items.len(), "expanding list");

        let mut docs = Vec::with_capacity(items.len());
        for item in items {
            let item_ctx = ctx.push(item);
            let variant = variant_name(script.call(item_ctx.call()).await?)?;
            docs.push(
                self.render_template(join(&address, &variant), item_ctx, stack)
                    .await?,
            );
        }
        Ok(Expansion { docs, variant: None })
    }
}
