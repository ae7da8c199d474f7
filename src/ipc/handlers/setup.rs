use crate::ipc::helpers::{required_str, with_conn, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::settings::{self, SetupSection};
use rusqlite::Connection;
use serde_json::{Map, Value};

fn setup_get(conn: &Connection, _params: &Value) -> HandlerResult {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        out.insert(
            section.name().to_string(),
            settings::load_section(conn, section)?,
        );
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> HandlerResult {
    let raw = required_str(params, "section")?;
    let section = SetupSection::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown section: {}", raw)))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let saved = settings::update_section(conn, section, patch)?;
    tracing::info!(section = section.name(), "settings updated");
    Ok(serde_json::json!({ "section": section.name(), "value": saved }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_conn(state, req, setup_get)),
        "setup.update" => Some(with_conn(state, req, setup_update)),
        _ => None,
    }
}
