use crate::dates;
use crate::error::CoreError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        if let CoreError::Storage(inner) = &e {
            tracing::error!(error = %inner, "storage failure");
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Runs `f` against the open workspace and wraps the outcome in a response.
pub fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Value) -> HandlerResult,
) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn from_params<T: DeserializeOwned>(params: &Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Trimmed and non-empty, or `bad_params`.
pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => Ok(Some(dates::parse_date(&raw)?)),
    }
}

pub fn date_range(params: &Value) -> Result<(Option<NaiveDate>, Option<NaiveDate>), HandlerErr> {
    let start = optional_date(params, "startDate")?;
    let end = optional_date(params, "endDate")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(HandlerErr::bad_params("startDate must not be after endDate"));
        }
    }
    Ok((start, end))
}
