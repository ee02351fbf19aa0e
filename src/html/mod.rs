//! HTML document model
//!
//! - [`Document`] - arena tree used for template skeletons and the live client DOM
//! - [`Document::parse`] - lenient tree builder for authored templates
//! - [`escape`] - text / attribute escaping

mod dom;
pub mod escape;
mod parse;

pub use dom::{Document, Element, NodeId, NodeKind};
pub use parse::ParseError;
