//! Billing cycle: payments are counted against sets of attended lessons.

use crate::dates;
use crate::directory::{self, StudentQuery};
use crate::error::{CoreError, CoreResult};
use crate::status::AttendanceStatus;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lessons covered by one paid set.
pub const SET_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Paid,
    DueSoon,
    DueNow,
}

/// The set opened at enrollment is owed before any lesson is attended.
pub fn expected_paid_sets(attended: u32) -> u32 {
    attended / SET_SIZE + 1
}

pub fn payment_state(attended: u32, actual_paid: u32) -> PaymentState {
    let expected = expected_paid_sets(attended);
    if actual_paid < expected {
        PaymentState::DueNow
    } else if actual_paid == expected && attended % SET_SIZE == SET_SIZE - 1 {
        PaymentState::DueSoon
    } else {
        PaymentState::Paid
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStatus {
    pub student_id: String,
    pub attended_lessons: u32,
    pub expected_paid_sets: u32,
    pub actual_paid_sets: u32,
    pub owes_payment: bool,
    pub last_payment_date: Option<String>,
    pub state: PaymentState,
    pub lessons_into_set: u32,
    pub lessons_until_next_set: u32,
}

impl BillingStatus {
    pub fn from_counts(
        student_id: &str,
        attended: u32,
        actual_paid: u32,
        last_payment_date: Option<String>,
    ) -> Self {
        let expected = expected_paid_sets(attended);
        let into_set = attended % SET_SIZE;
        Self {
            student_id: student_id.to_string(),
            attended_lessons: attended,
            expected_paid_sets: expected,
            actual_paid_sets: actual_paid,
            owes_payment: actual_paid < expected,
            last_payment_date,
            state: payment_state(attended, actual_paid),
            lessons_into_set: into_set,
            lessons_until_next_set: SET_SIZE - into_set,
        }
    }
}

pub fn attended_lessons(conn: &Connection, student_id: &str) -> CoreResult<u32> {
    let mut stmt = conn.prepare("SELECT id, status FROM attendances WHERE student_id = ?")?;
    let rows = stmt
        .query_map([student_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut attended = 0;
    for (id, raw) in rows {
        match AttendanceStatus::parse(&raw) {
            Ok(s) if s.is_attended() => attended += 1,
            Ok(_) => {}
            Err(e) => tracing::warn!(event_id = %id, error = %e, "not counting attendance row"),
        }
    }
    Ok(attended)
}

fn payment_counts(conn: &Connection, student_id: &str) -> CoreResult<(u32, Option<String>)> {
    Ok(conn.query_row(
        "SELECT COUNT(*), MAX(payment_date) FROM payments WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get::<_, i64>(0)? as u32, r.get(1)?)),
    )?)
}

pub fn billing_status(conn: &Connection, student_id: &str) -> CoreResult<BillingStatus> {
    directory::get_student(conn, student_id)?;
    let attended = attended_lessons(conn, student_id)?;
    let (paid, last) = payment_counts(conn, student_id)?;
    Ok(BillingStatus::from_counts(student_id, attended, paid, last))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewRow {
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub status: BillingStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub students: Vec<OverviewRow>,
    pub owing_count: usize,
}

/// Students come back in directory order (last name, first name).
pub fn overview(conn: &Connection, active_only: bool) -> CoreResult<Overview> {
    let students = directory::list_students(
        conn,
        &StudentQuery {
            active_only,
            q: None,
        },
    )?;
    let mut rows = Vec::with_capacity(students.len());
    for s in students {
        let status = billing_status(conn, &s.id)?;
        rows.push(OverviewRow {
            first_name: s.first_name,
            last_name: s.last_name,
            status,
        });
    }
    let owing_count = rows.iter().filter(|r| r.status.owes_payment).count();
    Ok(Overview {
        students: rows,
        owing_count,
    })
}

// ---------------------------------------------------------------------------
// Payments

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub student_id: String,
    pub amount_try: f64,
    pub payment_date: String,
    pub method: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    pub student_id: String,
    pub amount_try: f64,
    pub payment_date: Option<String>,
    pub method: Option<String>,
    pub note: Option<String>,
}

const PAYMENT_COLS: &str = "id, student_id, amount_try, payment_date, method, note, created_at";

fn payment_from_row(r: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: r.get(0)?,
        student_id: r.get(1)?,
        amount_try: r.get(2)?,
        payment_date: r.get(3)?,
        method: r.get(4)?,
        note: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn clean(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn create_payment(conn: &Connection, input: &PaymentInput) -> CoreResult<Payment> {
    directory::get_student(conn, &input.student_id)?;
    if !(input.amount_try.is_finite() && input.amount_try > 0.0) {
        return Err(CoreError::bad_params("amountTry must be a positive number"));
    }
    let payment_date = match clean(input.payment_date.as_deref()) {
        Some(raw) => dates::parse_date(&raw)?,
        None => dates::today(),
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments(id, student_id, amount_try, payment_date, method, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            input.student_id,
            input.amount_try,
            dates::fmt_date(payment_date),
            clean(input.method.as_deref()),
            clean(input.note.as_deref()),
            dates::fmt_datetime(dates::now_local()),
        ],
    )?;
    tracing::info!(payment_id = %id, student_id = %input.student_id, "payment recorded");
    get_payment(conn, &id)
}

pub fn get_payment(conn: &Connection, id: &str) -> CoreResult<Payment> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLS);
    conn.query_row(&sql, [id], payment_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("payment", id))
}

pub fn list_payments(conn: &Connection, student_id: &str) -> CoreResult<Vec<Payment>> {
    directory::get_student(conn, student_id)?;
    let sql = format!(
        "SELECT {} FROM payments WHERE student_id = ?
         ORDER BY payment_date DESC, created_at DESC, id DESC",
        PAYMENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], payment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_payment(conn: &Connection, id: &str) -> CoreResult<()> {
    let n = conn.execute("DELETE FROM payments WHERE id = ?", [id])?;
    if n == 0 {
        return Err(CoreError::not_found("payment", id));
    }
    tracing::info!(payment_id = id, "payment deleted");
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    pub course_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLine {
    #[serde(flatten)]
    pub payment: Payment,
    pub student_name: String,
}

/// Payments across students, newest first. The course filter goes through
/// enrollments since a payment is not tied to a lesson.
pub fn payments_in_range(conn: &Connection, filter: &PaymentFilter) -> CoreResult<Vec<PaymentLine>> {
    let mut sql = String::from(
        "SELECT p.id, p.student_id, p.amount_try, p.payment_date, p.method, p.note, p.created_at,
                s.first_name, s.last_name
         FROM payments p
         JOIN students s ON s.id = p.student_id
         WHERE 1 = 1",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(d) = filter.start_date {
        sql.push_str(" AND p.payment_date >= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    if let Some(d) = filter.end_date {
        sql.push_str(" AND p.payment_date <= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    if let Some(c) = &filter.course_id {
        sql.push_str(
            " AND p.student_id IN (SELECT student_id FROM enrollments WHERE course_id = ?)",
        );
        bind.push(Value::Text(c.clone()));
    }
    sql.push_str(" ORDER BY p.payment_date DESC, p.created_at DESC, p.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            let first: String = r.get(7)?;
            let last: String = r.get(8)?;
            Ok(PaymentLine {
                payment: payment_from_row(r)?,
                student_name: format!("{} {}", first, last),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
