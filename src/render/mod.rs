//! Render Module - recursive template resolution (v0.1)
//!
//! Key types:
//! - `Renderer`: turns a template path plus arguments into HTML
//! - `RenderContext`: arguments accumulated along the descent
//! - `RenderHooks`: host extension points of the root page

mod context;
mod engine;
mod hooks;

pub use context::RenderContext;
pub use engine::Renderer;
pub use hooks::{NoHooks, RenderHooks};
