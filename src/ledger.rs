//! Attendance ledger.
//!
//! One row per (lesson, student, calendar day of `marked_at`). Re-recording on
//! the same day updates that row; another day is a new event, which is how a
//! weekly lesson template accumulates history. The rule is enforced by the
//! `uq_attendances_lesson_student_day` index, not by callers.

use crate::dates;
use crate::directory;
use crate::error::{CoreError, CoreResult};
use crate::status::AttendanceStatus;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    pub id: String,
    pub lesson_id: String,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub note: Option<String>,
    pub marked_at: String,
    pub marked_on: String,
}

/// Event plus whatever the lesson template still says about it. The lesson
/// fields are `None` for orphaned events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedEvent {
    #[serde(flatten)]
    pub event: AttendanceEvent,
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    pub lesson_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSort {
    MarkedAtAsc,
    #[default]
    MarkedAtDesc,
    LessonDateAsc,
    LessonDateDesc,
}

impl EventSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "markedAtAsc" => Some(Self::MarkedAtAsc),
            "markedAtDesc" => Some(Self::MarkedAtDesc),
            "lessonDateAsc" => Some(Self::LessonDateAsc),
            "lessonDateDesc" => Some(Self::LessonDateDesc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarkedAtAsc => "markedAtAsc",
            Self::MarkedAtDesc => "markedAtDesc",
            Self::LessonDateAsc => "lessonDateAsc",
            Self::LessonDateDesc => "lessonDateDesc",
        }
    }

    fn order_by(self) -> &'static str {
        match self {
            Self::MarkedAtAsc => "a.marked_at ASC, a.id ASC",
            Self::MarkedAtDesc => "a.marked_at DESC, a.id DESC",
            Self::LessonDateAsc => "l.lesson_date ASC, a.marked_at ASC, a.id ASC",
            Self::LessonDateDesc => "l.lesson_date DESC, a.marked_at DESC, a.id DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub student_id: Option<String>,
    pub teacher_id: Option<String>,
    pub course_id: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort: EventSort,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    pub lesson_id: String,
    pub student_id: String,
    pub status: String,
    pub occurred_at: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recorded {
    pub event: AttendanceEvent,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    pub deleted: bool,
    pub assignment_retracted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEntry {
    pub student_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitLesson {
    pub lesson_id: String,
    #[serde(default)]
    pub entries: Vec<SubmitEntry>,
    pub occurred_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub student_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RowFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub lesson_id: String,
    pub recorded: usize,
    pub failed: usize,
    pub rows: Vec<RowOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllOutcome {
    pub deleted: usize,
    pub assignments_retracted: usize,
}

const EVENT_COLS: &str = "a.id, a.lesson_id, a.student_id, a.status, a.note, a.marked_at, a.marked_on";

struct RawEvent {
    id: String,
    lesson_id: String,
    student_id: String,
    status: String,
    note: Option<String>,
    marked_at: String,
    marked_on: String,
}

fn raw_from_row(r: &Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        student_id: r.get(2)?,
        status: r.get(3)?,
        note: r.get(4)?,
        marked_at: r.get(5)?,
        marked_on: r.get(6)?,
    })
}

impl RawEvent {
    fn into_event(self) -> CoreResult<AttendanceEvent> {
        Ok(AttendanceEvent {
            status: AttendanceStatus::parse(&self.status)?,
            id: self.id,
            lesson_id: self.lesson_id,
            student_id: self.student_id,
            note: self.note,
            marked_at: self.marked_at,
            marked_on: self.marked_on,
        })
    }

    /// Listing path: unreadable rows are logged and left out.
    fn into_listed(self) -> Option<AttendanceEvent> {
        let id = self.id.clone();
        match self.into_event() {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::warn!(event_id = %id, error = %e, "skipping attendance row");
                None
            }
        }
    }
}

/// Every stored spelling that reads back as `status`.
fn stored_spellings(status: AttendanceStatus) -> &'static [&'static str] {
    match status {
        AttendanceStatus::Present => &["PRESENT"],
        AttendanceStatus::ExcusedAbsent => &["EXCUSED_ABSENT"],
        AttendanceStatus::UnexcusedAbsent => &["UNEXCUSED_ABSENT", "ABSENT"],
        AttendanceStatus::Makeup => &["MAKEUP", "LATE"],
    }
}

fn clean_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn fetch_raw(conn: &Connection, event_id: &str) -> CoreResult<Option<RawEvent>> {
    let sql = format!("SELECT {} FROM attendances a WHERE a.id = ?", EVENT_COLS);
    Ok(conn.query_row(&sql, [event_id], raw_from_row).optional()?)
}

pub fn get_event(conn: &Connection, event_id: &str) -> CoreResult<AttendanceEvent> {
    fetch_raw(conn, event_id)?
        .ok_or_else(|| CoreError::not_found("attendance", event_id))?
        .into_event()
}

fn event_id_on_day(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
    day: &str,
) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM attendances WHERE lesson_id = ? AND student_id = ? AND marked_on = ?",
            (lesson_id, student_id, day),
            |r| r.get(0),
        )
        .optional()?)
}

pub fn record_attendance(conn: &Connection, req: &RecordRequest) -> CoreResult<Recorded> {
    let status = AttendanceStatus::parse(&req.status)?;
    let lesson = directory::get_lesson(conn, &req.lesson_id)?;
    directory::get_student(conn, &req.student_id)?;
    let at = match req.occurred_at.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            dates::parse_occurred_at(raw, lesson.start_naive_time().unwrap_or(NaiveTime::MIN))?
        }
        None => dates::now_local(),
    };
    let marked_at = dates::fmt_datetime(at);
    let marked_on = dates::fmt_date(at.date());
    let note = clean_note(req.note.as_deref());

    let tx = conn.unchecked_transaction()?;
    let (id, created) = match event_id_on_day(&tx, &lesson.id, &req.student_id, &marked_on)? {
        Some(id) => {
            tx.execute(
                "UPDATE attendances SET status = ?, marked_at = ?, note = COALESCE(?, note)
                 WHERE id = ?",
                (status.as_str(), &marked_at, &note, &id),
            )?;
            (id, false)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO attendances(id, lesson_id, student_id, status, note, marked_at, marked_on)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    lesson.id,
                    req.student_id,
                    status.as_str(),
                    note,
                    marked_at,
                    marked_on
                ],
            )?;
            (id, true)
        }
    };
    directory::link_student_to_lesson(&tx, &lesson.id, &req.student_id)?;
    tx.commit()?;

    tracing::info!(
        event_id = %id,
        lesson_id = %lesson.id,
        student_id = %req.student_id,
        status = %status,
        created,
        "attendance recorded"
    );
    Ok(Recorded {
        event: get_event(conn, &id)?,
        created,
    })
}

/// A date-only `new_occurred_at` keeps the event's time of day. `note` of
/// `Some("")` clears the note; `None` leaves it alone.
pub fn correct_attendance(
    conn: &Connection,
    event_id: &str,
    new_status: &str,
    new_occurred_at: Option<&str>,
    note: Option<&str>,
) -> CoreResult<AttendanceEvent> {
    let current = fetch_raw(conn, event_id)?
        .ok_or_else(|| CoreError::not_found("attendance", event_id))?;
    let status = AttendanceStatus::parse(new_status)?;

    let (marked_at, marked_on) = match new_occurred_at.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => {
            let keep_time = dates::parse_stored_datetime(&current.marked_at)
                .map(|dt| dt.time())
                .unwrap_or(NaiveTime::MIN);
            let at = dates::parse_occurred_at(raw, keep_time)?;
            (dates::fmt_datetime(at), dates::fmt_date(at.date()))
        }
        None => (current.marked_at.clone(), current.marked_on.clone()),
    };
    if marked_on != current.marked_on {
        if let Some(other) =
            event_id_on_day(conn, &current.lesson_id, &current.student_id, &marked_on)?
        {
            return Err(CoreError::constraint(format!(
                "attendance {} already exists for this lesson and student on {}",
                other, marked_on
            )));
        }
    }
    let note = match note {
        Some(n) => clean_note(Some(n)),
        None => current.note.clone(),
    };

    conn.execute(
        "UPDATE attendances SET status = ?, marked_at = ?, marked_on = ?, note = ? WHERE id = ?",
        (status.as_str(), &marked_at, &marked_on, &note, event_id),
    )?;
    tracing::info!(event_id, status = %status, "attendance corrected");
    get_event(conn, event_id)
}

pub fn delete_attendance(conn: &Connection, event_id: &str) -> CoreResult<Deleted> {
    let tx = conn.unchecked_transaction()?;
    let (lesson_id, student_id): (String, String) = tx
        .query_row(
            "SELECT lesson_id, student_id FROM attendances WHERE id = ?",
            [event_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found("attendance", event_id))?;
    tx.execute("DELETE FROM attendances WHERE id = ?", [event_id])?;

    let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM attendances WHERE lesson_id = ? AND student_id = ?",
        (&lesson_id, &student_id),
        |r| r.get(0),
    )?;
    let assignment_retracted = if remaining == 0 {
        directory::unlink_student_from_lesson(&tx, &lesson_id, &student_id)?
    } else {
        false
    };
    tx.commit()?;

    tracing::info!(event_id, assignment_retracted, "attendance deleted");
    Ok(Deleted {
        deleted: true,
        assignment_retracted,
    })
}

/// Clears the whole ledger, or one lesson's part of it. Assignments are
/// retracted only for the pairs whose attendance was removed.
pub fn delete_all(conn: &Connection, lesson_id: Option<&str>) -> CoreResult<DeleteAllOutcome> {
    if let Some(id) = lesson_id {
        directory::get_lesson(conn, id)?;
    }
    let tx = conn.unchecked_transaction()?;
    let (scope, bind): (&str, Vec<Value>) = match lesson_id {
        Some(id) => (" WHERE lesson_id = ?", vec![Value::Text(id.to_string())]),
        None => ("", Vec::new()),
    };
    let pairs: Vec<(String, String)> = {
        let sql = format!(
            "SELECT DISTINCT lesson_id, student_id FROM attendances{}",
            scope
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind.iter()), |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let deleted = tx.execute(
        &format!("DELETE FROM attendances{}", scope),
        params_from_iter(bind.iter()),
    )?;
    let mut assignments_retracted = 0;
    for (l, s) in &pairs {
        if directory::unlink_student_from_lesson(&tx, l, s)? {
            assignments_retracted += 1;
        }
    }
    tx.commit()?;

    tracing::warn!(
        lesson_id = lesson_id.unwrap_or("*"),
        deleted,
        assignments_retracted,
        "attendance bulk delete"
    );
    Ok(DeleteAllOutcome {
        deleted,
        assignments_retracted,
    })
}

pub fn list_for_lesson(conn: &Connection, lesson_id: &str) -> CoreResult<Vec<AttendanceEvent>> {
    directory::get_lesson(conn, lesson_id)?;
    let sql = format!(
        "SELECT {} FROM attendances a WHERE a.lesson_id = ? ORDER BY a.marked_at, a.id",
        EVENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([lesson_id], raw_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(raws.into_iter().filter_map(RawEvent::into_listed).collect())
}

/// Events across students. Teacher and course filters go through the lesson,
/// so they exclude orphaned events; without them orphans are listed.
pub fn list_events(conn: &Connection, filter: &EventFilter) -> CoreResult<Vec<ListedEvent>> {
    let mut sql = format!(
        "SELECT {}, l.course_id, l.teacher_id, l.lesson_date
         FROM attendances a
         LEFT JOIN lessons l ON l.id = a.lesson_id
         WHERE 1 = 1",
        EVENT_COLS
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(s) = &filter.student_id {
        sql.push_str(" AND a.student_id = ?");
        bind.push(Value::Text(s.clone()));
    }
    if let Some(t) = &filter.teacher_id {
        sql.push_str(" AND l.teacher_id = ?");
        bind.push(Value::Text(t.clone()));
    }
    if let Some(c) = &filter.course_id {
        sql.push_str(" AND l.course_id = ?");
        bind.push(Value::Text(c.clone()));
    }
    if let Some(status) = filter.status {
        let spellings = stored_spellings(status);
        let marks = vec!["?"; spellings.len()].join(", ");
        sql.push_str(&format!(" AND UPPER(TRIM(a.status)) IN ({})", marks));
        bind.extend(spellings.iter().map(|s| Value::Text(s.to_string())));
    }
    if let Some(d) = filter.start_date {
        sql.push_str(" AND a.marked_on >= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    if let Some(d) = filter.end_date {
        sql.push_str(" AND a.marked_on <= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(filter.sort.order_by());
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        bind.push(Value::Integer(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                raw_from_row(r)?,
                r.get::<_, Option<String>>(7)?,
                r.get::<_, Option<String>>(8)?,
                r.get::<_, Option<String>>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(raw, course_id, teacher_id, lesson_date)| {
            raw.into_listed().map(|event| ListedEvent {
                event,
                course_id,
                teacher_id,
                lesson_date,
            })
        })
        .collect())
}

pub fn list_for_student(
    conn: &Connection,
    student_id: &str,
    filter: &EventFilter,
) -> CoreResult<Vec<ListedEvent>> {
    directory::get_student(conn, student_id)?;
    let scoped = EventFilter {
        student_id: Some(student_id.to_string()),
        ..filter.clone()
    };
    list_events(conn, &scoped)
}

/// Bulk form submission for one lesson occurrence. Every row runs on its
/// own, so one failure leaves its siblings recorded.
pub fn submit_lesson(conn: &Connection, req: &SubmitLesson) -> CoreResult<SubmitOutcome> {
    let lesson = directory::get_lesson(conn, &req.lesson_id)?;
    let occurred_at = req
        .occurred_at
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(raw) = occurred_at {
        dates::parse_occurred_at(raw, NaiveTime::MIN)?;
    }

    let marked: Vec<&SubmitEntry> = req
        .entries
        .iter()
        .filter(|e| e.status.as_deref().is_some_and(|s| !s.trim().is_empty()))
        .collect();
    if marked.is_empty() {
        return Err(CoreError::NoValidEntries);
    }

    let mut rows = Vec::with_capacity(marked.len());
    for entry in marked {
        let result = directory::is_student_assigned_to_lesson(conn, &lesson.id, &entry.student_id)
            .and_then(|assigned| {
                if !assigned {
                    return Err(CoreError::constraint("student is not assigned to this lesson"));
                }
                record_attendance(
                    conn,
                    &RecordRequest {
                        lesson_id: lesson.id.clone(),
                        student_id: entry.student_id.clone(),
                        status: entry.status.clone().unwrap_or_default(),
                        occurred_at: occurred_at.map(str::to_string),
                        note: entry.note.clone(),
                    },
                )
            });
        rows.push(match result {
            Ok(rec) => RowOutcome {
                student_id: entry.student_id.clone(),
                ok: true,
                event_id: Some(rec.event.id),
                created: Some(rec.created),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    lesson_id = %lesson.id,
                    student_id = %entry.student_id,
                    error = %e,
                    "attendance row rejected"
                );
                RowOutcome {
                    student_id: entry.student_id.clone(),
                    ok: false,
                    event_id: None,
                    created: None,
                    error: Some(RowFailure {
                        code: e.code(),
                        message: e.to_string(),
                    }),
                }
            }
        });
    }

    let recorded = rows.iter().filter(|r| r.ok).count();
    let failed = rows.len() - recorded;
    tracing::info!(lesson_id = %lesson.id, recorded, failed, "lesson attendance submitted");
    Ok(SubmitOutcome {
        lesson_id: lesson.id,
        recorded,
        failed,
        rows,
    })
}
