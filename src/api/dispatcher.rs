//! API action dispatch (v0.1)
//!
//! Order of checks for one submission:
//! 1. byte limit against the declared content length (411 / 413)
//! 2. access script (403)
//! 3. body parsing against the upload spec (400)
//! 4. action script (500 on failure)
//!
//! Uploaded files belong to the exchange and are removed when it drops,
//! whichever way the dispatch ends.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::form::Form;
use crate::config::NullsConfig;
use crate::exchange::{
    Exchange, Request, Response, BAD_REQUEST, FORBIDDEN, INTERNAL_ERROR, LENGTH_REQUIRED,
    NOT_FOUND, PAYLOAD_TOO_LARGE,
};
use crate::script::CallContext;
use crate::store::ActionRegistry;

#[derive(Debug, Clone)]
pub struct ApiDispatcher {
    actions: Arc<ActionRegistry>,
    upload_dir: PathBuf,
    default_limit: Option<u64>,
}

impl ApiDispatcher {
    pub fn new(actions: Arc<ActionRegistry>, config: &NullsConfig) -> Self {
        Self {
            actions,
            upload_dir: config.uploads.clone(),
            default_limit: config.upload_limit,
        }
    }

    pub fn handles(&self, path: &str) -> bool {
        self.actions.contains(path)
    }

    #[instrument(skip(self, request), fields(action = %request.path))]
    pub async fn dispatch(&self, request: Request) -> Response {
        let Some(action) = self.actions.get(&request.path) else {
            return Response::status(NOT_FOUND);
        };
        let name = action.path.as_str();

        if let Some(limit) = action.limit().or(self.default_limit) {
            match request.content_length() {
                None => {
                    warn!(action = name, "rejected: content-length required");
                    return Response::status(LENGTH_REQUIRED);
                }
                Some(len) if len > limit => {
                    warn!(action = name, len, limit, "rejected: payload too large");
                    return Response::status(PAYLOAD_TOO_LARGE);
                }
                Some(_) => {}
            }
        }

        let mut exchange = Exchange::new(request);

        if let Some(access) = action.access() {
            match access.test(CallContext::new(&exchange, &[])).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(action = name, "rejected: access denied");
                    return Response::status(FORBIDDEN);
                }
                Err(e) => {
                    error!(action = name, error = %e, "access script failed");
                    return Response::status(INTERNAL_ERROR);
                }
            }
        }

        let form = match Form::parse(exchange.request(), action.upload(), &self.upload_dir) {
            Ok(form) => form,
            Err(e) if e.is_client_error() => {
                warn!(action = name, error = %e, "rejected: bad request body");
                return Response::status(BAD_REQUEST);
            }
            Err(e) => {
                error!(action = name, error = %e, "could not store upload");
                return Response::status(INTERNAL_ERROR);
            }
        };
        debug!(action = name, files = form.file_count(), "body parsed");
        exchange.set_form(form);

        let result = match action.script() {
            Some(script) => script.call(CallContext::new(&exchange, &[])).await,
            None => Ok(Value::Null),
        };
        match result {
            Ok(value) => exchange.finish(Response::json(&value)),
            Err(e) => {
                error!(action = name, error = %e, "action failed");
                Response::status(INTERNAL_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::BoundScript;
    use crate::store::ActionDecl;
    use serde_json::json;
    use tempfile::TempDir;

    fn dispatcher(decl: ActionDecl, dir: &TempDir) -> ApiDispatcher {
        let mut reg = ActionRegistry::new();
        reg.register(decl).unwrap();
        let config = NullsConfig {
            uploads: dir.path().to_path_buf(),
            ..Default::default()
        };
        ApiDispatcher::new(Arc::new(reg), &config)
    }

    fn action(script: BoundScript) -> ActionDecl {
        ActionDecl {
            path: "/submit".into(),
            file: "root/index".into(),
            script: Some(script),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(action(BoundScript::Constant(json!(1))), &dir);
        assert!(!d.handles("/other"));
        assert_eq!(d.dispatch(Request::post("/other")).await.status, NOT_FOUND);
    }

    #[tokio::test]
    async fn limit_rejects_before_anything_runs() {
        let dir = TempDir::new().unwrap();
        let mut decl = action(BoundScript::Constant(json!("ran")));
        decl.limit = Some(1024);
        let d = dispatcher(decl, &dir);

        let big = Request::post("/submit").with_header("content-length", "2048");
        assert_eq!(d.dispatch(big).await.status, PAYLOAD_TOO_LARGE);

        let missing = Request::post("/submit");
        assert_eq!(d.dispatch(missing).await.status, LENGTH_REQUIRED);

        let ok = Request::post("/submit").with_body("application/x-www-form-urlencoded", "a=1");
        let res = d.dispatch(ok).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body_text(), "\"ran\"");
    }

    #[tokio::test]
    async fn falsy_access_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let mut decl = action(BoundScript::Constant(json!("ran")));
        decl.access = Some(BoundScript::Constant(json!(0)));
        let d = dispatcher(decl, &dir);
        assert_eq!(d.dispatch(Request::post("/submit")).await.status, FORBIDDEN);
    }
}
