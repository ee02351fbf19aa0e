//! Wire protocol router (v0.1)
//!
//! Server side of the endpoints the hydration controller talks to.
//! Framework agnostic: the host HTTP server converts its request into a
//! [`Request`] and writes the returned [`Response`] back.
//!
//! | Route | Method | Answer |
//! |-------|--------|--------|
//! | `/null-container/root` | POST | root type |
//! | `/null-container/<template>/<slot>` | POST | type token |
//! | `/static/nulls/<address>/<token>.html` | GET | fragment |
//! | `/null-data/<template>/<slot>` | POST | JSON |
//! | `/null-validator/<template>/<slot>` | POST | cache token |
//! | `/static/parsers/<template>/<slot>.js` | GET | parser source |
//! | `/null-request/<template>/<slot>` | POST | JSON |
//! | `/static/handlers/<template>/<slot>.js` | GET | handler source |
//! | `/null-load/<template>/<slot>` | POST | continuation token |
//! | `/static/dummies/<template>/<slot>.html` | GET | placeholder |
//! | `/null-title` | POST | document title |
//! | declared actions | POST | action result |
//! | anything else | GET | full page |

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::api::{ApiDispatcher, Form};
use crate::error::{ErrorKind, NullsError, Result};
use crate::exchange::{Exchange, Request, Response, BAD_REQUEST, INTERNAL_ERROR, NOT_FOUND};
use crate::render::{RenderContext, Renderer};
use crate::script::stringify;
use crate::store::{EndpointKind, Slot, TemplateStore};

pub const CONTAINER_PREFIX: &str = "/null-container/";
pub const DATA_PREFIX: &str = "/null-data/";
pub const VALIDATOR_PREFIX: &str = "/null-validator/";
pub const REQUEST_PREFIX: &str = "/null-request/";
pub const LOAD_PREFIX: &str = "/null-load/";
pub const TITLE_PATH: &str = "/null-title";
pub const FRAGMENT_PREFIX: &str = "/static/nulls/";
pub const PARSER_PREFIX: &str = "/static/parsers/";
pub const HANDLER_PREFIX: &str = "/static/handlers/";
pub const DUMMY_PREFIX: &str = "/static/dummies/";

/// Token text of a script result; null reads as empty
fn token(value: &Value) -> String {
    if value.is_null() {
        String::new()
    } else {
        stringify(value)
    }
}

fn strip<'p>(path: &'p str, prefix: &str, suffix: &str) -> Option<&'p str> {
    path.strip_prefix(prefix)?
        .strip_suffix(suffix)
        .filter(|key| !key.is_empty())
}

#[derive(Clone)]
pub struct WireRouter {
    renderer: Renderer,
    dispatcher: ApiDispatcher,
}

impl WireRouter {
    pub fn new(renderer: Renderer) -> Self {
        let store = renderer.store();
        let dispatcher = ApiDispatcher::new(Arc::clone(store.actions()), store.config());
        Self {
            renderer,
            dispatcher,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    fn store(&self) -> &TemplateStore {
        self.renderer.store()
    }

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn handle(&self, request: Request) -> Response {
        let path = request.path.clone();
        match request.method.as_str() {
            "POST" => self.post(&path, request).await,
            "GET" | "HEAD" => self.get(&path, request).await,
            _ => Response::status(NOT_FOUND),
        }
    }

    async fn post(&self, path: &str, request: Request) -> Response {
        if path == "/null-container/root" {
            return Response::text(self.store().config().root_type.clone());
        }
        if path == TITLE_PATH {
            return self.title(request).await;
        }
        let routes = [
            (CONTAINER_PREFIX, EndpointKind::Container),
            (DATA_PREFIX, EndpointKind::Data),
            (VALIDATOR_PREFIX, EndpointKind::Validator),
            (REQUEST_PREFIX, EndpointKind::Request),
            (LOAD_PREFIX, EndpointKind::Loader),
        ];
        for (prefix, kind) in routes {
            if let Some(key) = strip(path, prefix, "") {
                return self.slot_endpoint(kind, key, request).await;
            }
        }
        if self.dispatcher.handles(path) {
            return self.dispatcher.dispatch(request).await;
        }
        Response::status(NOT_FOUND)
    }

    async fn get(&self, path: &str, request: Request) -> Response {
        if let Some(rest) = strip(path, FRAGMENT_PREFIX, ".html") {
            let Some((address, variant)) = rest.rsplit_once('/') else {
                return Response::status(NOT_FOUND);
            };
            let ctx = RenderContext::from_request(request);
            return match self.renderer.render_fragment(address, variant, &ctx).await {
                Ok(html) => ctx.exchange().finish(Response::html(html)),
                Err(e) => failure(path, e),
            };
        }

        let endpoints = self.store().endpoints();
        if let Some(key) = strip(path, PARSER_PREFIX, ".js") {
            return match endpoints.lookup(EndpointKind::Parser, key) {
                Some(e) => Response::javascript(source_text(&e.slot, EndpointKind::Parser)),
                None => Response::status(NOT_FOUND),
            };
        }
        if let Some(key) = strip(path, HANDLER_PREFIX, ".js") {
            return match endpoints.lookup(EndpointKind::Handler, key) {
                Some(e) => Response::javascript(source_text(&e.slot, EndpointKind::Handler)),
                None => Response::status(NOT_FOUND),
            };
        }
        if let Some(key) = strip(path, DUMMY_PREFIX, ".html") {
            return match endpoints.lookup(EndpointKind::Dummy, key) {
                Some(e) => Response::html(e.slot.dummy.clone().unwrap_or_default()),
                None => Response::status(NOT_FOUND),
            };
        }
        if path.starts_with("/static/") {
            return Response::status(NOT_FOUND);
        }

        let ctx = RenderContext::from_request(request);
        match self.renderer.render_page(&ctx).await {
            Ok(html) => ctx.exchange().finish(Response::html(html)),
            Err(e) => failure(path, e),
        }
    }

    /// Parse the tracker payload into an exchange; file trackers land in `request.files`
    fn exchange(&self, request: Request) -> std::result::Result<Exchange, Response> {
        match Form::parse_trackers(&request, &self.store().config().uploads) {
            Ok(form) => Ok(Exchange::with_form(request, form)),
            Err(e) => {
                warn!(path = %request.path, error = %e, "rejected tracker payload");
                Err(Response::status(BAD_REQUEST))
            }
        }
    }

    async fn slot_endpoint(&self, kind: EndpointKind, key: &str, request: Request) -> Response {
        let Some(endpoint) = self.store().endpoints().lookup(kind, key) else {
            return Response::status(NOT_FOUND);
        };
        let path = request.path.clone();
        let exchange = match self.exchange(request) {
            Ok(exchange) => exchange,
            Err(response) => return response,
        };
        let ctx = RenderContext::new(Arc::new(exchange));
        match run_endpoint(kind, &endpoint.slot, &ctx).await {
            Ok(response) => {
                debug!(endpoint = key, "served");
                ctx.exchange().finish(response)
            }
            Err(e) => failure(&path, e),
        }
    }

    async fn title(&self, request: Request) -> Response {
        let exchange = match self.exchange(request) {
            Ok(exchange) => exchange,
            Err(response) => return response,
        };
        let target = exchange
            .form()
            .field("path")
            .map(str::to_string)
            .unwrap_or_else(|| "/".to_string());
        match self.renderer.hooks().title(&target, &exchange).await {
            Ok(title) => exchange.finish(Response::text(title)),
            Err(e) => failure(TITLE_PATH, e),
        }
    }
}

/// Evaluate the script behind a POST endpoint
async fn run_endpoint(kind: EndpointKind, slot: &Slot, ctx: &RenderContext) -> Result<Response> {
    let ctx = match &slot.caps.arguments {
        Some(args) => ctx.extend(args.call(ctx.call()).await?),
        None => ctx.clone(),
    };
    let script = match kind {
        EndpointKind::Container => slot.caps.container.as_ref(),
        EndpointKind::Data => slot.caps.data.as_ref(),
        EndpointKind::Validator => slot.client.validator.as_ref(),
        EndpointKind::Request => slot.client.request.as_ref(),
        EndpointKind::Loader => slot.client.loader.as_ref(),
        _ => None,
    };
    let Some(script) = script else {
        return Ok(Response::status(NOT_FOUND));
    };
    let value = script.call(ctx.call()).await?;
    Ok(match kind {
        EndpointKind::Data | EndpointKind::Request => Response::json(&value),
        _ => Response::text(token(&value)),
    })
}

fn source_text(slot: &Slot, kind: EndpointKind) -> String {
    let source = match kind {
        EndpointKind::Parser => slot.client.parser.as_ref(),
        _ => slot.client.handler.as_ref(),
    };
    source.map(|s| s.text.clone()).unwrap_or_default()
}

/// Log a per-request failure; the client only sees a generic status
fn failure(path: &str, e: NullsError) -> Response {
    match e.kind() {
        ErrorKind::Path => {
            warn!(path, error = %e, "not found");
            Response::status(NOT_FOUND)
        }
        _ => {
            error!(path, error = %e, "request failed");
            Response::status(INTERNAL_ERROR)
        }
    }
}
