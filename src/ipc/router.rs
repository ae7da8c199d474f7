use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[Handler] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::directory::try_handle,
    handlers::attendance::try_handle,
    handlers::billing::try_handle,
    handlers::reports::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            return resp;
        }
    }
    tracing::debug!(method = %req.method, "unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
