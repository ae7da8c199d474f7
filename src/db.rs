use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "piarte.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_memory_db() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            date_of_birth TEXT,
            parent_name TEXT,
            parent_phone TEXT,
            address TEXT,
            phone_primary TEXT,
            phone_secondary TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces created before the active flag existed.
    ensure_students_is_active(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            joined_at TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;

    // No foreign keys to courses/teachers: a lesson template outlives a
    // removed course, and readers must tolerate the dangling reference.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            lesson_date TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            description TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_teacher ON lessons(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)",
        [],
    )?;

    // One teacher per student: student_id is the key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_students(
            student_id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_students_teacher ON teacher_students(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_students(
            lesson_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(lesson_id, student_id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_students_student ON lesson_students(student_id)",
        [],
    )?;

    // lesson_id is deliberately unconstrained: attendance history is kept
    // when a lesson template is removed.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendances(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT,
            marked_at TEXT NOT NULL,
            marked_on TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_attendances_marked_on(conn)?;
    collapse_duplicate_attendances(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_attendances_lesson_student_day
         ON attendances(lesson_id, student_id, marked_on)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendances_student ON attendances(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendances_lesson ON attendances(lesson_id)",
        [],
    )?;
    migrate_legacy_statuses(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            amount_try REAL NOT NULL,
            payment_date TEXT NOT NULL,
            method TEXT,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_students_is_active(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "is_active")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN is_active INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    tracing::info!("migrated students: added is_active");
    Ok(())
}

fn ensure_attendances_marked_on(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendances", "marked_on")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendances ADD COLUMN marked_on TEXT", [])?;
    // marked_at is ISO text; its first ten characters are the calendar day.
    let n = conn.execute(
        "UPDATE attendances SET marked_on = substr(marked_at, 1, 10) WHERE marked_on IS NULL",
        [],
    )?;
    tracing::info!(rows = n, "migrated attendances: backfilled marked_on");
    Ok(())
}

fn collapse_duplicate_attendances(conn: &Connection) -> anyhow::Result<()> {
    // Older versions appended a row per submission. Keep the latest row for
    // each (lesson, student, day) so the unique index can be built.
    let n = conn.execute(
        "DELETE FROM attendances
         WHERE rowid NOT IN (
           SELECT MAX(rowid)
           FROM attendances
           GROUP BY lesson_id, student_id, marked_on
         )",
        [],
    )?;
    if n > 0 {
        tracing::warn!(rows = n, "collapsed duplicate attendance rows");
    }
    Ok(())
}

fn migrate_legacy_statuses(conn: &Connection) -> anyhow::Result<()> {
    // LATE became MAKEUP; bare ABSENT predates the excused/unexcused split.
    let late = conn.execute(
        "UPDATE attendances SET status = 'MAKEUP' WHERE UPPER(TRIM(status)) = 'LATE'",
        [],
    )?;
    let absent = conn.execute(
        "UPDATE attendances SET status = 'UNEXCUSED_ABSENT' WHERE UPPER(TRIM(status)) = 'ABSENT'",
        [],
    )?;
    if late + absent > 0 {
        tracing::info!(late, absent, "migrated legacy attendance statuses");
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring malformed settings value");
            Ok(None)
        }
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, raw),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
