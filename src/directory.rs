//! Student / teacher / course / lesson records and their assignment relations.
//!
//! The ledger, billing and reporting modules only read this store through the
//! lookups here (`get_student`, `get_teacher`, `get_lesson`,
//! `list_students_assigned_to_lesson`, `list_students_assigned_to_teacher`)
//! plus the lesson link helpers the ledger needs for its cascade rule.

use crate::dates;
use crate::error::{CoreError, CoreResult};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub address: Option<String>,
    pub phone_primary: Option<String>,
    pub phone_secondary: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub address: Option<String>,
    pub phone_primary: Option<String>,
    pub phone_secondary: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuery {
    #[serde(default)]
    pub active_only: bool,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub teacher_id: String,
    /// Template date; recurring lessons keep the first occurrence here.
    pub lesson_date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
}

impl Lesson {
    pub fn start_naive_time(&self) -> Option<NaiveTime> {
        self.start_time
            .as_deref()
            .and_then(|t| dates::parse_time(t).ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInput {
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    pub lesson_date: Option<String>,
    /// 0 = Monday .. 6 = Sunday; snaps `lesson_date` within its week.
    pub weekday: Option<u32>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TeacherLink {
    Created,
    Existing,
    OtherTeacher,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonAssignment {
    pub lesson_id: String,
    pub student_id: String,
    pub enrolled: bool,
    pub linked: bool,
    pub teacher_link: TeacherLink,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_ts() -> String {
    dates::fmt_datetime(dates::now_local())
}

/// Trims; empty strings become `None`.
fn clean(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required_name(v: Option<&String>, field: &str) -> CoreResult<String> {
    clean(v).ok_or_else(|| CoreError::bad_params(format!("{} must not be empty", field)))
}

fn check_optional_date(v: &Option<String>, field: &str) -> CoreResult<()> {
    if let Some(d) = v {
        dates::parse_date(d)
            .map_err(|_| CoreError::bad_params(format!("{} must be YYYY-MM-DD", field)))?;
    }
    Ok(())
}

fn normalize_optional_time(v: Option<&String>) -> CoreResult<Option<String>> {
    match clean(v) {
        None => Ok(None),
        Some(t) => Ok(Some(dates::parse_time(&t)?.format(dates::TIME_FMT).to_string())),
    }
}

// ---------------------------------------------------------------------------
// Students

const STUDENT_COLS: &str = "id, first_name, last_name, date_of_birth, parent_name, parent_phone,
     address, phone_primary, phone_secondary, is_active, created_at";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        date_of_birth: r.get(3)?,
        parent_name: r.get(4)?,
        parent_phone: r.get(5)?,
        address: r.get(6)?,
        phone_primary: r.get(7)?,
        phone_secondary: r.get(8)?,
        is_active: r.get::<_, i64>(9)? != 0,
        created_at: r.get(10)?,
    })
}

pub fn create_student(conn: &Connection, input: &StudentInput) -> CoreResult<Student> {
    let first_name = required_name(input.first_name.as_ref(), "firstName")?;
    let last_name = required_name(input.last_name.as_ref(), "lastName")?;
    let date_of_birth = clean(input.date_of_birth.as_ref());
    check_optional_date(&date_of_birth, "dateOfBirth")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, first_name, last_name, date_of_birth, parent_name, parent_phone,
                              address, phone_primary, phone_secondary, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            first_name,
            last_name,
            date_of_birth,
            clean(input.parent_name.as_ref()),
            clean(input.parent_phone.as_ref()),
            clean(input.address.as_ref()),
            clean(input.phone_primary.as_ref()),
            clean(input.phone_secondary.as_ref()),
            input.is_active.unwrap_or(true) as i64,
            now_ts(),
        ],
    )?;
    get_student(conn, &id)
}

pub fn find_student(conn: &Connection, id: &str) -> CoreResult<Option<Student>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
    Ok(conn.query_row(&sql, [id], student_from_row).optional()?)
}

pub fn get_student(conn: &Connection, id: &str) -> CoreResult<Student> {
    find_student(conn, id)?.ok_or_else(|| CoreError::not_found("student", id))
}

pub fn list_students(conn: &Connection, query: &StudentQuery) -> CoreResult<Vec<Student>> {
    let mut sql = format!("SELECT {} FROM students WHERE 1 = 1", STUDENT_COLS);
    let mut bind: Vec<Value> = Vec::new();
    if query.active_only {
        sql.push_str(" AND is_active = 1");
    }
    if let Some(q) = clean(query.q.as_ref()) {
        sql.push_str(
            " AND (LOWER(first_name) LIKE ? OR LOWER(last_name) LIKE ?
                   OR LOWER(first_name || ' ' || last_name) LIKE ?)",
        );
        let pattern = format!("%{}%", q.to_lowercase());
        for _ in 0..3 {
            bind.push(Value::Text(pattern.clone()));
        }
    }
    sql.push_str(" ORDER BY LOWER(last_name), LOWER(first_name), id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fields absent from the patch keep their value; an empty string clears an
/// optional field.
pub fn update_student(conn: &Connection, id: &str, patch: &StudentInput) -> CoreResult<Student> {
    let current = get_student(conn, id)?;
    let first_name = match &patch.first_name {
        Some(_) => required_name(patch.first_name.as_ref(), "firstName")?,
        None => current.first_name,
    };
    let last_name = match &patch.last_name {
        Some(_) => required_name(patch.last_name.as_ref(), "lastName")?,
        None => current.last_name,
    };
    let pick = |new: &Option<String>, old: Option<String>| match new {
        Some(_) => clean(new.as_ref()),
        None => old,
    };
    let date_of_birth = pick(&patch.date_of_birth, current.date_of_birth);
    check_optional_date(&date_of_birth, "dateOfBirth")?;
    conn.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, date_of_birth = ?, parent_name = ?, parent_phone = ?,
             address = ?, phone_primary = ?, phone_secondary = ?, is_active = ?
         WHERE id = ?",
        rusqlite::params![
            first_name,
            last_name,
            date_of_birth,
            pick(&patch.parent_name, current.parent_name),
            pick(&patch.parent_phone, current.parent_phone),
            pick(&patch.address, current.address),
            pick(&patch.phone_primary, current.phone_primary),
            pick(&patch.phone_secondary, current.phone_secondary),
            patch.is_active.unwrap_or(current.is_active) as i64,
            id,
        ],
    )?;
    get_student(conn, id)
}

pub fn delete_student(conn: &Connection, id: &str) -> CoreResult<()> {
    get_student(conn, id)?;
    let tx = conn.unchecked_transaction()?;
    // Dependency order; there is no ON DELETE CASCADE.
    tx.execute("DELETE FROM attendances WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM payments WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM lesson_students WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM teacher_students WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM enrollments WHERE student_id = ?", [id])?;
    tx.execute("DELETE FROM students WHERE id = ?", [id])?;
    tx.commit()?;
    tracing::info!(student_id = id, "student deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Teachers

const TEACHER_COLS: &str = "id, first_name, last_name, phone, email, created_at";

fn teacher_from_row(r: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        phone: r.get(3)?,
        email: r.get(4)?,
        created_at: r.get(5)?,
    })
}

pub fn create_teacher(conn: &Connection, input: &TeacherInput) -> CoreResult<Teacher> {
    let first_name = required_name(input.first_name.as_ref(), "firstName")?;
    let last_name = required_name(input.last_name.as_ref(), "lastName")?;
    let id = new_id();
    conn.execute(
        "INSERT INTO teachers(id, first_name, last_name, phone, email, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            first_name,
            last_name,
            clean(input.phone.as_ref()),
            clean(input.email.as_ref()),
            now_ts(),
        ],
    )?;
    get_teacher(conn, &id)
}

pub fn find_teacher(conn: &Connection, id: &str) -> CoreResult<Option<Teacher>> {
    let sql = format!("SELECT {} FROM teachers WHERE id = ?", TEACHER_COLS);
    Ok(conn.query_row(&sql, [id], teacher_from_row).optional()?)
}

pub fn get_teacher(conn: &Connection, id: &str) -> CoreResult<Teacher> {
    find_teacher(conn, id)?.ok_or_else(|| CoreError::not_found("teacher", id))
}

pub fn list_teachers(conn: &Connection) -> CoreResult<Vec<Teacher>> {
    let sql = format!(
        "SELECT {} FROM teachers ORDER BY LOWER(last_name), LOWER(first_name), id",
        TEACHER_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], teacher_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_teacher(conn: &Connection, id: &str, patch: &TeacherInput) -> CoreResult<Teacher> {
    let current = get_teacher(conn, id)?;
    let first_name = match &patch.first_name {
        Some(_) => required_name(patch.first_name.as_ref(), "firstName")?,
        None => current.first_name,
    };
    let last_name = match &patch.last_name {
        Some(_) => required_name(patch.last_name.as_ref(), "lastName")?,
        None => current.last_name,
    };
    let phone = match &patch.phone {
        Some(_) => clean(patch.phone.as_ref()),
        None => current.phone,
    };
    let email = match &patch.email {
        Some(_) => clean(patch.email.as_ref()),
        None => current.email,
    };
    conn.execute(
        "UPDATE teachers SET first_name = ?, last_name = ?, phone = ?, email = ? WHERE id = ?",
        rusqlite::params![first_name, last_name, phone, email, id],
    )?;
    get_teacher(conn, id)
}

pub fn delete_teacher(conn: &Connection, id: &str) -> CoreResult<()> {
    get_teacher(conn, id)?;
    let lessons: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE teacher_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if lessons > 0 {
        return Err(CoreError::constraint(format!(
            "teacher still owns {} lesson(s); delete or reassign them first",
            lessons
        )));
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM teacher_students WHERE teacher_id = ?", [id])?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(())
}

pub fn teacher_of_student(conn: &Connection, student_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT teacher_id FROM teacher_students WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Returns `true` when a new link was written. Reassignment must go through
/// [`unassign_student_from_teacher`] first.
pub fn assign_student_to_teacher(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
) -> CoreResult<bool> {
    get_teacher(conn, teacher_id)?;
    get_student(conn, student_id)?;
    match teacher_of_student(conn, student_id)? {
        Some(existing) if existing == teacher_id => Ok(false),
        Some(existing) => Err(CoreError::ConstraintViolation {
            message: format!(
                "student {} is already assigned to teacher {}",
                student_id, existing
            ),
        }),
        None => {
            conn.execute(
                "INSERT INTO teacher_students(student_id, teacher_id, created_at) VALUES(?, ?, ?)",
                (student_id, teacher_id, now_ts()),
            )?;
            Ok(true)
        }
    }
}

pub fn unassign_student_from_teacher(conn: &Connection, student_id: &str) -> CoreResult<bool> {
    get_student(conn, student_id)?;
    let n = conn.execute(
        "DELETE FROM teacher_students WHERE student_id = ?",
        [student_id],
    )?;
    Ok(n > 0)
}

pub fn list_students_assigned_to_teacher(
    conn: &Connection,
    teacher_id: &str,
) -> CoreResult<Vec<Student>> {
    get_teacher(conn, teacher_id)?;
    let sql = format!(
        "SELECT {} FROM students
         WHERE id IN (SELECT student_id FROM teacher_students WHERE teacher_id = ?)
         ORDER BY LOWER(first_name), LOWER(last_name), id",
        STUDENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([teacher_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Courses & enrollments

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        name: r.get(1)?,
        created_at: r.get(2)?,
    })
}

fn ensure_course_name_free(conn: &Connection, name: &str, except_id: Option<&str>) -> CoreResult<()> {
    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM courses WHERE LOWER(name) = LOWER(?)",
            [name],
            |r| r.get(0),
        )
        .optional()?;
    match clash {
        Some(other) if Some(other.as_str()) != except_id => Err(CoreError::constraint(format!(
            "course name already exists: {}",
            name
        ))),
        _ => Ok(()),
    }
}

pub fn create_course(conn: &Connection, name: &str) -> CoreResult<Course> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("name must not be empty"));
    }
    ensure_course_name_free(conn, name, None)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO courses(id, name, created_at) VALUES(?, ?, ?)",
        (&id, name, now_ts()),
    )?;
    get_course(conn, &id)
}

pub fn find_course(conn: &Connection, id: &str) -> CoreResult<Option<Course>> {
    Ok(conn
        .query_row(
            "SELECT id, name, created_at FROM courses WHERE id = ?",
            [id],
            course_from_row,
        )
        .optional()?)
}

pub fn get_course(conn: &Connection, id: &str) -> CoreResult<Course> {
    find_course(conn, id)?.ok_or_else(|| CoreError::not_found("course", id))
}

pub fn list_courses(conn: &Connection) -> CoreResult<Vec<Course>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM courses ORDER BY name")?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn rename_course(conn: &Connection, id: &str, name: &str) -> CoreResult<Course> {
    get_course(conn, id)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_params("name must not be empty"));
    }
    ensure_course_name_free(conn, name, Some(id))?;
    conn.execute("UPDATE courses SET name = ? WHERE id = ?", (name, id))?;
    get_course(conn, id)
}

/// Lessons referencing the course are kept; readers treat the reference as
/// missing.
pub fn delete_course(conn: &Connection, id: &str) -> CoreResult<()> {
    get_course(conn, id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM enrollments WHERE course_id = ?", [id])?;
    tx.execute("DELETE FROM courses WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(())
}

pub fn enroll_student(conn: &Connection, student_id: &str, course_id: &str) -> CoreResult<bool> {
    get_student(conn, student_id)?;
    get_course(conn, course_id)?;
    let n = conn.execute(
        "INSERT OR IGNORE INTO enrollments(student_id, course_id, joined_at) VALUES(?, ?, ?)",
        (student_id, course_id, now_ts()),
    )?;
    Ok(n > 0)
}

// ---------------------------------------------------------------------------
// Lessons

const LESSON_COLS: &str =
    "id, course_id, teacher_id, lesson_date, start_time, end_time, description, created_at";

fn lesson_from_row(r: &Row<'_>) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: r.get(0)?,
        course_id: r.get(1)?,
        teacher_id: r.get(2)?,
        lesson_date: r.get(3)?,
        start_time: r.get(4)?,
        end_time: r.get(5)?,
        description: r.get(6)?,
        created_at: r.get(7)?,
    })
}

fn resolve_lesson_date(raw: &str, weekday: Option<u32>) -> CoreResult<NaiveDate> {
    let date = dates::parse_date(raw)?;
    match weekday {
        Some(w) => dates::snap_to_weekday(date, w),
        None => Ok(date),
    }
}

pub fn create_lesson(conn: &Connection, input: &LessonInput) -> CoreResult<Lesson> {
    let course_id = clean(input.course_id.as_ref())
        .ok_or_else(|| CoreError::bad_params("missing courseId"))?;
    let teacher_id = clean(input.teacher_id.as_ref())
        .ok_or_else(|| CoreError::bad_params("missing teacherId"))?;
    let raw_date = clean(input.lesson_date.as_ref())
        .ok_or_else(|| CoreError::bad_params("missing lessonDate"))?;
    get_course(conn, &course_id)?;
    get_teacher(conn, &teacher_id)?;
    let lesson_date = resolve_lesson_date(&raw_date, input.weekday)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO lessons(id, course_id, teacher_id, lesson_date, start_time, end_time,
                             description, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            course_id,
            teacher_id,
            dates::fmt_date(lesson_date),
            normalize_optional_time(input.start_time.as_ref())?,
            normalize_optional_time(input.end_time.as_ref())?,
            clean(input.description.as_ref()),
            now_ts(),
        ],
    )?;
    get_lesson(conn, &id)
}

pub fn find_lesson(conn: &Connection, id: &str) -> CoreResult<Option<Lesson>> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLS);
    Ok(conn.query_row(&sql, [id], lesson_from_row).optional()?)
}

pub fn get_lesson(conn: &Connection, id: &str) -> CoreResult<Lesson> {
    find_lesson(conn, id)?.ok_or_else(|| CoreError::not_found("lesson", id))
}

/// Ordered by template date then start time.
pub fn list_lessons(
    conn: &Connection,
    teacher_id: Option<&str>,
    course_id: Option<&str>,
) -> CoreResult<Vec<Lesson>> {
    let mut sql = format!("SELECT {} FROM lessons WHERE 1 = 1", LESSON_COLS);
    let mut bind: Vec<Value> = Vec::new();
    if let Some(t) = teacher_id {
        sql.push_str(" AND teacher_id = ?");
        bind.push(Value::Text(t.to_string()));
    }
    if let Some(c) = course_id {
        sql.push_str(" AND course_id = ?");
        bind.push(Value::Text(c.to_string()));
    }
    sql.push_str(" ORDER BY lesson_date, COALESCE(start_time, ''), id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_lesson(conn: &Connection, id: &str, patch: &LessonInput) -> CoreResult<Lesson> {
    let current = get_lesson(conn, id)?;
    let course_id = match clean(patch.course_id.as_ref()) {
        Some(c) => {
            get_course(conn, &c)?;
            c
        }
        None => current.course_id,
    };
    let teacher_id = match clean(patch.teacher_id.as_ref()) {
        Some(t) => {
            get_teacher(conn, &t)?;
            t
        }
        None => current.teacher_id,
    };
    let raw_date = clean(patch.lesson_date.as_ref()).unwrap_or(current.lesson_date);
    let lesson_date = resolve_lesson_date(&raw_date, patch.weekday)?;
    let start_time = match &patch.start_time {
        Some(_) => normalize_optional_time(patch.start_time.as_ref())?,
        None => current.start_time,
    };
    let end_time = match &patch.end_time {
        Some(_) => normalize_optional_time(patch.end_time.as_ref())?,
        None => current.end_time,
    };
    let description = match &patch.description {
        Some(_) => clean(patch.description.as_ref()),
        None => current.description,
    };
    conn.execute(
        "UPDATE lessons
         SET course_id = ?, teacher_id = ?, lesson_date = ?, start_time = ?, end_time = ?,
             description = ?
         WHERE id = ?",
        rusqlite::params![
            course_id,
            teacher_id,
            dates::fmt_date(lesson_date),
            start_time,
            end_time,
            description,
            id,
        ],
    )?;
    get_lesson(conn, id)
}

/// Removes the template and its student links. Attendance rows stay: they
/// are billing history.
pub fn delete_lesson(conn: &Connection, id: &str) -> CoreResult<()> {
    get_lesson(conn, id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM lesson_students WHERE lesson_id = ?", [id])?;
    tx.execute("DELETE FROM lessons WHERE id = ?", [id])?;
    tx.commit()?;
    Ok(())
}

pub fn is_student_assigned_to_lesson(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
) -> CoreResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM lesson_students WHERE lesson_id = ? AND student_id = ?",
            (lesson_id, student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Bare link row; no course/teacher side effects.
pub fn link_student_to_lesson(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
) -> CoreResult<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO lesson_students(lesson_id, student_id, created_at) VALUES(?, ?, ?)",
        (lesson_id, student_id, now_ts()),
    )?;
    Ok(n > 0)
}

pub fn unlink_student_from_lesson(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
) -> CoreResult<bool> {
    let n = conn.execute(
        "DELETE FROM lesson_students WHERE lesson_id = ? AND student_id = ?",
        (lesson_id, student_id),
    )?;
    Ok(n > 0)
}

/// Enrolls the student in the lesson's course, links them to the lesson, and
/// links them to the lesson's teacher when they have none yet. An existing
/// link to another teacher is reported, never overwritten.
pub fn assign_student_to_lesson(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
) -> CoreResult<LessonAssignment> {
    let lesson = get_lesson(conn, lesson_id)?;
    get_student(conn, student_id)?;
    let tx = conn.unchecked_transaction()?;
    let enrolled = match find_course(&tx, &lesson.course_id)? {
        Some(course) => enroll_student(&tx, student_id, &course.id)?,
        None => false,
    };
    let linked = link_student_to_lesson(&tx, lesson_id, student_id)?;
    let teacher_link = match teacher_of_student(&tx, student_id)? {
        Some(t) if t == lesson.teacher_id => TeacherLink::Existing,
        Some(_) => TeacherLink::OtherTeacher,
        None => {
            assign_student_to_teacher(&tx, &lesson.teacher_id, student_id)?;
            TeacherLink::Created
        }
    };
    tx.commit()?;
    if teacher_link == TeacherLink::OtherTeacher {
        tracing::warn!(lesson_id, student_id, "student belongs to another teacher");
    }
    Ok(LessonAssignment {
        lesson_id: lesson_id.to_string(),
        student_id: student_id.to_string(),
        enrolled,
        linked,
        teacher_link,
    })
}

pub fn list_students_assigned_to_lesson(
    conn: &Connection,
    lesson_id: &str,
) -> CoreResult<Vec<Student>> {
    get_lesson(conn, lesson_id)?;
    let sql = format!(
        "SELECT {} FROM students
         WHERE id IN (SELECT student_id FROM lesson_students WHERE lesson_id = ?)
         ORDER BY LOWER(first_name), LOWER(last_name), id",
        STUDENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lesson_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db::open_memory_db;

    #[test]
    fn second_teacher_assignment_is_a_constraint_violation() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t1 = teacher(&conn, "Mert", "Kaya");
        let t2 = teacher(&conn, "Selin", "Demir");

        assert!(assign_student_to_teacher(&conn, &t1.id, &s.id).expect("assign"));
        assert!(!assign_student_to_teacher(&conn, &t1.id, &s.id).expect("same teacher again"));
        let e = assign_student_to_teacher(&conn, &t2.id, &s.id).expect_err("second teacher");
        assert_eq!(e.code(), "constraint_violation");
        assert_eq!(
            teacher_of_student(&conn, &s.id).expect("lookup"),
            Some(t1.id.clone())
        );

        assert!(unassign_student_from_teacher(&conn, &s.id).expect("unassign"));
        assert!(assign_student_to_teacher(&conn, &t2.id, &s.id).expect("reassign"));
    }

    #[test]
    fn lesson_assignment_enrolls_and_reports_teacher_link() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t1 = teacher(&conn, "Mert", "Kaya");
        let t2 = teacher(&conn, "Selin", "Demir");
        let keman = create_course(&conn, "Keman").expect("course");
        let l1 = lesson(&conn, &keman, &t1, "2024-03-04");
        let l2 = lesson(&conn, &keman, &t2, "2024-03-05");

        let a1 = assign_student_to_lesson(&conn, &l1.id, &s.id).expect("assign l1");
        assert!(a1.enrolled && a1.linked);
        assert_eq!(a1.teacher_link, TeacherLink::Created);

        let a2 = assign_student_to_lesson(&conn, &l2.id, &s.id).expect("assign l2");
        assert!(!a2.enrolled);
        assert_eq!(a2.teacher_link, TeacherLink::OtherTeacher);
        assert_eq!(
            teacher_of_student(&conn, &s.id).expect("lookup"),
            Some(t1.id.clone())
        );

        let on_l2 = list_students_assigned_to_lesson(&conn, &l2.id).expect("list");
        assert_eq!(on_l2.len(), 1);
        let of_t1 = list_students_assigned_to_teacher(&conn, &t1.id).expect("list");
        assert_eq!(of_t1.len(), 1);
        assert!(list_students_assigned_to_teacher(&conn, &t2.id)
            .expect("list")
            .is_empty());
    }

    #[test]
    fn weekday_snaps_template_date() {
        let conn = open_memory_db().expect("db");
        let t = teacher(&conn, "Mert", "Kaya");
        let c = create_course(&conn, "Bateri").expect("course");
        let l = create_lesson(
            &conn,
            &LessonInput {
                course_id: Some(c.id.clone()),
                teacher_id: Some(t.id.clone()),
                lesson_date: Some("2024-03-06".to_string()),
                weekday: Some(4),
                start_time: Some("9:05".to_string()),
                ..Default::default()
            },
        )
        .expect("lesson");
        assert_eq!(l.lesson_date, "2024-03-08");
        assert_eq!(l.start_time.as_deref(), Some("09:05"));
    }

    #[test]
    fn course_names_are_unique_case_insensitively() {
        let conn = open_memory_db().expect("db");
        create_course(&conn, "Resim").expect("course");
        let e = create_course(&conn, " resim ").expect_err("duplicate");
        assert_eq!(e.code(), "constraint_violation");
        assert!(create_course(&conn, "   ").is_err());
    }

    #[test]
    fn teacher_with_lessons_cannot_be_deleted() {
        let conn = open_memory_db().expect("db");
        let t = teacher(&conn, "Mert", "Kaya");
        let c = create_course(&conn, "Bateri").expect("course");
        let l = lesson(&conn, &c, &t, "2024-03-04");
        assert_eq!(
            delete_teacher(&conn, &t.id).expect_err("has lessons").code(),
            "constraint_violation"
        );
        delete_lesson(&conn, &l.id).expect("delete lesson");
        delete_teacher(&conn, &t.id).expect("delete teacher");
        assert!(find_teacher(&conn, &t.id).expect("find").is_none());
    }

    #[test]
    fn student_patch_keeps_absent_fields_and_clears_blank_ones() {
        let conn = open_memory_db().expect("db");
        let s = create_student(
            &conn,
            &StudentInput {
                first_name: Some("Ada".into()),
                last_name: Some("Yilmaz".into()),
                parent_phone: Some("555".into()),
                address: Some("Kadikoy".into()),
                ..Default::default()
            },
        )
        .expect("create");
        let updated = update_student(
            &conn,
            &s.id,
            &StudentInput {
                address: Some("".into()),
                is_active: Some(false),
                ..Default::default()
            },
        )
        .expect("update");
        assert_eq!(updated.first_name, "Ada");
        assert_eq!(updated.parent_phone.as_deref(), Some("555"));
        assert_eq!(updated.address, None);
        assert!(!updated.is_active);

        let active = list_students(
            &conn,
            &StudentQuery {
                active_only: true,
                q: None,
            },
        )
        .expect("list");
        assert!(active.is_empty());
    }
}
