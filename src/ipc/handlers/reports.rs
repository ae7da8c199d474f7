use crate::billing::PaymentFilter;
use crate::ipc::helpers::{
    date_range, optional_str, required_str, to_result, with_conn, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, ReportFilter};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

fn reports_reconciliation(conn: &Connection, params: &Value) -> HandlerResult {
    let (start_date, end_date) = date_range(params)?;
    let filter = ReportFilter {
        teacher_id: optional_str(params, "teacherId"),
        student_id: optional_str(params, "studentId"),
        course_id: optional_str(params, "courseId"),
        start_date,
        end_date,
    };
    let report = reconcile::reconciliation(conn, &filter)?;
    if report.skipped_events > 0 {
        tracing::warn!(skipped = report.skipped_events, "reconciliation skipped events");
    }
    to_result(&report)
}

fn payment_filter(params: &Value) -> Result<PaymentFilter, HandlerErr> {
    let (start_date, end_date) = date_range(params)?;
    Ok(PaymentFilter {
        start_date,
        end_date,
        course_id: optional_str(params, "courseId"),
    })
}

fn reports_payments(conn: &Connection, params: &Value) -> HandlerResult {
    let filter = payment_filter(params)?;
    to_result(&reconcile::payments_report(conn, &filter)?)
}

fn reports_payments_csv(conn: &Connection, params: &Value) -> HandlerResult {
    let out_path = required_str(params, "outPath")?;
    let filter = payment_filter(params)?;
    let report = reconcile::payments_report(conn, &filter)?;
    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr {
            code: "io_failed",
            message: e.to_string(),
            details: Some(json!({ "path": parent.to_string_lossy() })),
        })?;
    }
    std::fs::write(&out, reconcile::payments_csv(&report)).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path })),
    })?;
    Ok(json!({
        "path": out_path,
        "rowsExported": report.payments.len(),
        "totalAmount": report.total_amount
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "reports.reconciliation" => reports_reconciliation,
        "reports.payments" => reports_payments,
        "reports.paymentsCsv" => reports_payments_csv,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
