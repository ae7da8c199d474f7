use crate::ipc::helpers::{
    date_range, from_params, optional_str, required_str, to_result, with_conn, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, EventFilter, EventSort, RecordRequest, SubmitLesson};
use crate::settings::{self, MAX_LIST_LIMIT};
use crate::status::AttendanceStatus;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Shared by the per-student and dashboard listings. `default_limit` is only
/// applied when the caller did not pass one.
fn parse_filter(
    conn: &Connection,
    params: &Value,
    default_limit: bool,
) -> Result<EventFilter, HandlerErr> {
    let defaults = settings::attendance_settings(conn)?;
    let status = match optional_str(params, "status") {
        Some(raw) => Some(AttendanceStatus::parse(&raw)?),
        None => None,
    };
    let sort = match optional_str(params, "sort") {
        Some(raw) => EventSort::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params(
                "sort must be one of: markedAtAsc, markedAtDesc, lessonDateAsc, lessonDateDesc",
            )
        })?,
        None => defaults.default_sort,
    };
    let limit = match params.get("limit") {
        None | Some(Value::Null) => default_limit.then_some(defaults.default_list_limit),
        Some(v) => {
            let n = v
                .as_i64()
                .filter(|n| (1..=MAX_LIST_LIMIT).contains(n))
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("limit must be in 1..={}", MAX_LIST_LIMIT))
                })?;
            Some(n as u32)
        }
    };
    let (start_date, end_date) = date_range(params)?;
    Ok(EventFilter {
        student_id: optional_str(params, "studentId"),
        teacher_id: optional_str(params, "teacherId"),
        course_id: optional_str(params, "courseId"),
        status,
        start_date,
        end_date,
        sort,
        limit,
    })
}

fn attendance_record(conn: &Connection, params: &Value) -> HandlerResult {
    let req: RecordRequest = from_params(params)?;
    to_result(&ledger::record_attendance(conn, &req)?)
}

fn attendance_correct(conn: &Connection, params: &Value) -> HandlerResult {
    let event_id = required_str(params, "eventId")?;
    let status = required_str(params, "status")?;
    let occurred_at = optional_str(params, "occurredAt");
    // An explicit empty note clears it; an absent one is left alone.
    let note = params.get("note").and_then(|v| v.as_str());
    to_result(&ledger::correct_attendance(
        conn,
        &event_id,
        &status,
        occurred_at.as_deref(),
        note,
    )?)
}

fn attendance_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let event_id = required_str(params, "eventId")?;
    to_result(&ledger::delete_attendance(conn, &event_id)?)
}

fn attendance_list_for_lesson(conn: &Connection, params: &Value) -> HandlerResult {
    let lesson_id = required_str(params, "lessonId")?;
    to_result(&ledger::list_for_lesson(conn, &lesson_id)?)
}

fn attendance_list_for_student(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let filter = parse_filter(conn, params, false)?;
    to_result(&ledger::list_for_student(conn, &student_id, &filter)?)
}

fn attendance_list(conn: &Connection, params: &Value) -> HandlerResult {
    let filter = parse_filter(conn, params, true)?;
    let events = ledger::list_events(conn, &filter)?;
    Ok(json!({
        "events": to_result(&events)?,
        "limit": filter.limit,
        "sort": filter.sort.as_str(),
    }))
}

fn attendance_submit_lesson(conn: &Connection, params: &Value) -> HandlerResult {
    let req: SubmitLesson = from_params(params)?;
    to_result(&ledger::submit_lesson(conn, &req)?)
}

fn attendance_delete_all(conn: &Connection, params: &Value) -> HandlerResult {
    let lesson_id = optional_str(params, "lessonId");
    to_result(&ledger::delete_all(conn, lesson_id.as_deref())?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "attendance.record" => attendance_record,
        "attendance.correct" => attendance_correct,
        "attendance.delete" => attendance_delete,
        "attendance.listForLesson" => attendance_list_for_lesson,
        "attendance.listForStudent" => attendance_list_for_student,
        "attendance.list" => attendance_list,
        "attendance.submitLesson" => attendance_submit_lesson,
        "attendance.deleteAll" => attendance_delete_all,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
