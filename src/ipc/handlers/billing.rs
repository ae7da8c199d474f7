use crate::billing::{self, PaymentInput};
use crate::ipc::helpers::{
    from_params, optional_bool, required_str, to_result, with_conn, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn payments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let input: PaymentInput = from_params(params)?;
    to_result(&billing::create_payment(conn, &input)?)
}

fn payments_list(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    to_result(&billing::list_payments(conn, &student_id)?)
}

fn payments_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let payment_id = required_str(params, "paymentId")?;
    billing::delete_payment(conn, &payment_id)?;
    Ok(json!({ "ok": true }))
}

fn billing_status(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    to_result(&billing::billing_status(conn, &student_id)?)
}

fn billing_overview(conn: &Connection, params: &Value) -> HandlerResult {
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(false);
    to_result(&billing::overview(conn, active_only)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "payments.create" => payments_create,
        "payments.list" => payments_list,
        "payments.delete" => payments_delete,
        "billing.status" => billing_status,
        "billing.overview" => billing_overview,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
