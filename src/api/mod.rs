//! Form-submission actions
//!
//! - `form`: body parsing and upload spooling
//! - `dispatcher`: limit / access / parse / execute pipeline

mod dispatcher;
pub mod form;

pub use dispatcher::ApiDispatcher;
pub use form::{Form, FormError, UploadSpec, UploadedFile};
