//! Nulls - declarative HTML templating with incremental client hydration
//!
//! Templates are plain HTML annotated with `null-*` role attributes. The
//! server side loads them into a [`TemplateStore`], renders pages with a
//! [`Renderer`] and answers the wire protocol through a [`WireRouter`]; the
//! [`client::Controller`] keeps a live document in step with the server
//! container by container.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod html;
pub mod render;
pub mod script;
pub mod store;
pub mod wire;

pub use api::{ApiDispatcher, Form, UploadedFile};
pub use client::{ClientError, Controller, HttpTransport, LocalTransport, Transport};
pub use config::NullsConfig;
pub use error::{ErrorKind, FixSuggestion, NullsError, Result};
pub use exchange::{Exchange, Request, Response};
pub use render::{NoHooks, RenderContext, RenderHooks, Renderer};
pub use script::{script_fn, BoundScript, ModuleRegistry, Provider, ProviderTable, Script};
pub use store::TemplateStore;
pub use wire::WireRouter;
