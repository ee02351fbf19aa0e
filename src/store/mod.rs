//! Store Module - compiled templates (v0.1)
//!
//! Built once at startup, read-only afterwards and shared via `Arc`.
//!
//! Key types:
//! - `TemplateStore`: every compiled `.html` file under the template root
//! - `ActionRegistry`: API actions merged across files
//! - `EndpointRegistry`: slots reachable from the browser runtime

mod actions;
mod endpoints;
mod template;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::config::NullsConfig;
use crate::error::{NullsError, Result};
use crate::script::{Binder, ModuleRegistry, ProviderTable};

pub use actions::{ActionDecl, ActionRegistry, ApiAction, Declared};
pub use endpoints::{Endpoint, EndpointKind, EndpointRegistry};
pub use template::{
    compile, Capabilities, ClientRoles, Compiled, Slot, Template, API_ATTR, ID_ATTR, ROLE_ATTR,
    TYPE_ATTR,
};
pub(crate) use template::join;

#[derive(Debug)]
pub struct TemplateStore {
    config: NullsConfig,
    templates: HashMap<String, Arc<Template>>,
    actions: Arc<ActionRegistry>,
    endpoints: EndpointRegistry,
}

/// `root/main/feed.html` relative to the root → `root/main/feed`
fn template_path(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?.with_extension("");
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl TemplateStore {
    /// Walk the template root, compile every file and merge the registries
    #[instrument(skip_all, fields(root = %config.templates.display()))]
    pub async fn load(
        config: &NullsConfig,
        modules: Arc<ModuleRegistry>,
        providers: ProviderTable,
    ) -> Result<Self> {
        let root = &config.templates;
        let root_file = root.join(format!("{}.html", config.root_template()));
        if !root_file.is_file() {
            return Err(NullsError::RootNotFound {
                path: root_file.display().to_string(),
            });
        }

        let binder = Binder::new(modules, providers, root.clone());
        let mut templates = HashMap::new();
        let mut actions = ActionRegistry::new();
        let mut endpoints = EndpointRegistry::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| NullsError::Io(e.into()))?;
            let file = entry.path();
            if !entry.file_type().is_file() || file.extension().map_or(true, |ext| ext != "html") {
                continue;
            }
            let Some(path) = template_path(root, file) else {
                continue;
            };
            let markup = tokio::fs::read_to_string(file).await?;
            let compiled = compile(&path, &markup, &binder).await?;
            for decl in compiled.actions {
                actions.register(decl)?;
            }
            endpoints.add(&compiled.template);
            debug!(template = %path, "loaded");
            templates.insert(path, Arc::new(compiled.template));
        }

        info!(
            templates = templates.len(),
            actions = actions.len(),
            endpoints = endpoints.len(),
            "template store ready"
        );
        Ok(Self {
            config: config.clone(),
            templates,
            actions: Arc::new(actions),
            endpoints,
        })
    }

    pub fn config(&self) -> &NullsConfig {
        &self.config
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Template>> {
        self.templates.get(path)
    }

    /// Like [`TemplateStore::get`], failing with a path error
    pub fn template(&self, path: &str) -> Result<&Arc<Template>> {
        self.get(path).ok_or_else(|| NullsError::TemplateNotFound {
            path: path.to_string(),
        })
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    /// Sorted template paths
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
