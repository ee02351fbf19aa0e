//! Global API action registry
//!
//! Every file may contribute parts of an action (`null-api="/submit"`): the
//! action script, the access check, the upload spec, a byte limit. A part
//! may be declared once across the whole template tree.

use std::collections::BTreeMap;

use crate::api::UploadSpec;
use crate::error::{NullsError, Result};
use crate::script::BoundScript;

/// A part of an action together with the file that declared it
#[derive(Debug, Clone)]
pub struct Declared<T> {
    pub value: T,
    pub file: String,
}

/// One registered action path
#[derive(Debug, Clone, Default)]
pub struct ApiAction {
    pub path: String,
    pub script: Option<Declared<BoundScript>>,
    pub access: Option<Declared<BoundScript>>,
    pub upload: Option<Declared<UploadSpec>>,
    pub limit: Option<Declared<u64>>,
}

impl ApiAction {
    pub fn script(&self) -> Option<&BoundScript> {
        self.script.as_ref().map(|d| &d.value)
    }

    pub fn access(&self) -> Option<&BoundScript> {
        self.access.as_ref().map(|d| &d.value)
    }

    pub fn upload(&self) -> Option<&UploadSpec> {
        self.upload.as_ref().map(|d| &d.value)
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit.as_ref().map(|d| d.value)
    }
}

/// The parts one element declares for an action
#[derive(Debug, Clone, Default)]
pub struct ActionDecl {
    pub path: String,
    pub file: String,
    pub script: Option<BoundScript>,
    pub access: Option<BoundScript>,
    pub upload: Option<UploadSpec>,
    pub limit: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, ApiAction>,
}

fn merge<T>(slot: &mut Option<Declared<T>>, value: Option<T>, file: &str, action: &str, part: &'static str) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if let Some(existing) = slot {
        return Err(NullsError::DuplicateAction {
            action: action.to_string(),
            part,
            first: existing.file.clone(),
            second: file.to_string(),
        });
    }
    *slot = Some(Declared {
        value,
        file: file.to_string(),
    });
    Ok(())
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a declaration; a part declared a second time is an error
    pub fn register(&mut self, decl: ActionDecl) -> Result<()> {
        let action = self
            .actions
            .entry(decl.path.clone())
            .or_insert_with(|| ApiAction {
                path: decl.path.clone(),
                ..Default::default()
            });
        merge(&mut action.script, decl.script, &decl.file, &decl.path, "script")?;
        merge(&mut action.access, decl.access, &decl.file, &decl.path, "access")?;
        merge(&mut action.upload, decl.upload, &decl.file, &decl.path, "upload")?;
        merge(&mut action.limit, decl.limit, &decl.file, &decl.path, "limit")?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&ApiAction> {
        self.actions.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.actions.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(file: &str, script: Option<&str>) -> ActionDecl {
        ActionDecl {
            path: "/submit".into(),
            file: file.into(),
            script: script.map(|s| BoundScript::Constant(json!(s))),
            ..Default::default()
        }
    }

    #[test]
    fn parts_from_different_files_combine() {
        let mut reg = ActionRegistry::new();
        reg.register(decl("root/index", Some("ok"))).unwrap();
        reg.register(ActionDecl {
            path: "/submit".into(),
            file: "root/main/form".into(),
            limit: Some(1024),
            ..Default::default()
        })
        .unwrap();
        let action = reg.get("/submit").unwrap();
        assert!(action.script().is_some());
        assert_eq!(action.limit(), Some(1024));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn second_script_names_action_and_both_files() {
        let mut reg = ActionRegistry::new();
        reg.register(decl("a", Some("one"))).unwrap();
        let err = reg.register(decl("b", Some("two"))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("/submit"));
        assert!(msg.contains("'a'") && msg.contains("'b'"));
        assert!(matches!(err, NullsError::DuplicateAction { part: "script", .. }));
    }

    #[test]
    fn empty_declarations_never_conflict() {
        let mut reg = ActionRegistry::new();
        reg.register(decl("a", Some("one"))).unwrap();
        reg.register(decl("b", None)).unwrap();
        assert_eq!(reg.get("/submit").unwrap().script.as_ref().unwrap().file, "a");
    }
}
