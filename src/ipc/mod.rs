//! JSON-lines request handling: one `Request` in, one envelope out.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
