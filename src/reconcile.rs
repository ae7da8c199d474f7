//! Teacher -> student attendance tallies for payroll reconciliation, plus the
//! payments report.

use crate::billing::{self, PaymentFilter, PaymentLine};
use crate::dates;
use crate::directory::{self, Course, Teacher};
use crate::error::{CoreError, CoreResult};
use crate::settings::{self, ReportSettings};
use crate::status::AttendanceStatus;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
    pub course_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub present: u32,
    pub excused_absent: u32,
    pub makeup: u32,
    pub unexcused_absent: u32,
    /// What the student is counted for.
    pub total: u32,
    /// What the teacher is paid for.
    pub payroll_total: u32,
}

impl Tally {
    /// Every status bumps its own counter. Unexcused absences count toward
    /// the total; on the special course they are not paid to the teacher.
    /// The student total ignores the special course on purpose: three
    /// present plus one unexcused there must read total 4, payroll 3.
    fn add(&mut self, status: AttendanceStatus, special_course: bool) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::ExcusedAbsent => self.excused_absent += 1,
            AttendanceStatus::Makeup => self.makeup += 1,
            AttendanceStatus::UnexcusedAbsent => self.unexcused_absent += 1,
        }
        let counted = matches!(
            status,
            AttendanceStatus::Present | AttendanceStatus::Makeup | AttendanceStatus::UnexcusedAbsent
        );
        if counted {
            self.total += 1;
        }
        let paid = if special_course {
            status.is_attended()
        } else {
            counted
        };
        if paid {
            self.payroll_total += 1;
        }
    }

    fn absorb(&mut self, other: &Tally) {
        self.present += other.present;
        self.excused_absent += other.excused_absent;
        self.makeup += other.makeup;
        self.unexcused_absent += other.unexcused_absent;
        self.total += other.total;
        self.payroll_total += other.payroll_total;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSection {
    pub teacher_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub students: Vec<StudentRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub special_course_name: String,
    pub teachers: Vec<TeacherSection>,
    pub totals: Tally,
    pub skipped_events: usize,
}

struct StudentAcc {
    first_name: String,
    last_name: String,
    tally: Tally,
    days: BTreeSet<NaiveDate>,
}

struct EventRow {
    id: String,
    student_id: String,
    status: String,
    marked_on: String,
    teacher_id: String,
    course_id: String,
    student_name: Option<(String, String)>,
}

fn name_key(first: &str, last: &str, id: &str) -> (String, String, String) {
    (last.to_lowercase(), first.to_lowercase(), id.to_string())
}

fn events_in_scope(conn: &Connection, filter: &ReportFilter) -> CoreResult<Vec<EventRow>> {
    // Inner join on lessons: an event without its lesson has no teacher to
    // report under.
    let mut sql = String::from(
        "SELECT a.id, a.student_id, a.status, a.marked_on, l.teacher_id, l.course_id,
                s.first_name, s.last_name
         FROM attendances a
         JOIN lessons l ON l.id = a.lesson_id
         LEFT JOIN students s ON s.id = a.student_id
         WHERE 1 = 1",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(t) = &filter.teacher_id {
        sql.push_str(" AND l.teacher_id = ?");
        bind.push(Value::Text(t.clone()));
    }
    if let Some(c) = &filter.course_id {
        sql.push_str(" AND l.course_id = ?");
        bind.push(Value::Text(c.clone()));
    }
    if let Some(s) = &filter.student_id {
        sql.push_str(" AND a.student_id = ?");
        bind.push(Value::Text(s.clone()));
    }
    if let Some(d) = filter.start_date {
        sql.push_str(" AND a.marked_on >= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    if let Some(d) = filter.end_date {
        sql.push_str(" AND a.marked_on <= ?");
        bind.push(Value::Text(dates::fmt_date(d)));
    }
    sql.push_str(" ORDER BY a.marked_on, a.id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            let first: Option<String> = r.get(6)?;
            let last: Option<String> = r.get(7)?;
            Ok(EventRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                status: r.get(2)?,
                marked_on: r.get(3)?,
                teacher_id: r.get(4)?,
                course_id: r.get(5)?,
                student_name: first.zip(last),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn reconciliation(conn: &Connection, filter: &ReportFilter) -> CoreResult<ReconciliationReport> {
    let cfg = settings::report_settings(conn)?;
    build_report(conn, filter, &cfg)
}

fn build_report(
    conn: &Connection,
    filter: &ReportFilter,
    cfg: &ReportSettings,
) -> CoreResult<ReconciliationReport> {
    let teachers: Vec<Teacher> = match &filter.teacher_id {
        Some(id) => vec![directory::get_teacher(conn, id)?],
        None => directory::list_teachers(conn)?,
    };
    let courses: HashMap<String, Course> = directory::list_courses(conn)?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
    let special = cfg.special_course_name.trim().to_lowercase();

    let mut per_teacher: HashMap<String, HashMap<String, StudentAcc>> = teachers
        .iter()
        .map(|t| (t.id.clone(), HashMap::new()))
        .collect();
    let mut skipped_events = 0usize;

    for ev in events_in_scope(conn, filter)? {
        let Some(students) = per_teacher.get_mut(&ev.teacher_id) else {
            tracing::warn!(event_id = %ev.id, teacher_id = %ev.teacher_id, "report skip: lesson teacher missing");
            skipped_events += 1;
            continue;
        };
        let Some(course) = courses.get(&ev.course_id) else {
            tracing::warn!(event_id = %ev.id, course_id = %ev.course_id, "report skip: lesson course missing");
            skipped_events += 1;
            continue;
        };
        let Some((first_name, last_name)) = ev.student_name else {
            tracing::warn!(event_id = %ev.id, student_id = %ev.student_id, "report skip: student missing");
            skipped_events += 1;
            continue;
        };
        let status = match AttendanceStatus::parse(&ev.status) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(event_id = %ev.id, error = %e, "report skip: unreadable status");
                skipped_events += 1;
                continue;
            }
        };
        let day = match dates::parse_date(&ev.marked_on) {
            Ok(d) => d,
            Err(_) => {
                tracing::warn!(event_id = %ev.id, marked_on = %ev.marked_on, "report skip: unreadable day");
                skipped_events += 1;
                continue;
            }
        };

        let acc = students
            .entry(ev.student_id.clone())
            .or_insert_with(|| StudentAcc {
                first_name,
                last_name,
                tally: Tally::default(),
                days: BTreeSet::new(),
            });
        acc.tally
            .add(status, course.name.trim().to_lowercase() == special);
        acc.days.insert(day);
    }

    let mut sections = Vec::new();
    let mut totals = Tally::default();
    for t in teachers {
        let Some(students) = per_teacher.remove(&t.id) else {
            continue;
        };
        if students.is_empty() {
            continue;
        }
        let mut rows = Vec::with_capacity(students.len());
        for (student_id, acc) in students {
            let rendered = acc
                .days
                .iter()
                .map(|d| {
                    dates::format_date_with(*d, &cfg.date_format).ok_or_else(|| {
                        CoreError::bad_params(format!(
                            "dateFormat cannot render a date: {}",
                            cfg.date_format
                        ))
                    })
                })
                .collect::<CoreResult<Vec<_>>>()?;
            rows.push(StudentRow {
                student_id,
                first_name: acc.first_name,
                last_name: acc.last_name,
                tally: acc.tally,
                dates: rendered,
            });
        }
        rows.sort_by_key(|r| name_key(&r.first_name, &r.last_name, &r.student_id));

        let mut tally = Tally::default();
        for r in &rows {
            tally.absorb(&r.tally);
        }
        totals.absorb(&tally);
        sections.push(TeacherSection {
            teacher_id: t.id,
            first_name: t.first_name,
            last_name: t.last_name,
            tally,
            students: rows,
        });
    }
    sections.sort_by_key(|s| name_key(&s.first_name, &s.last_name, &s.teacher_id));

    Ok(ReconciliationReport {
        special_course_name: cfg.special_course_name.clone(),
        teachers: sections,
        totals,
        skipped_events,
    })
}

// ---------------------------------------------------------------------------
// Payments report

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentsReport {
    pub payments: Vec<PaymentLine>,
    pub total_amount: f64,
}

pub fn payments_report(conn: &Connection, filter: &PaymentFilter) -> CoreResult<PaymentsReport> {
    let payments = billing::payments_in_range(conn, filter)?;
    let total_amount = payments.iter().map(|p| p.payment.amount_try).sum();
    Ok(PaymentsReport {
        payments,
        total_amount,
    })
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn payments_csv(report: &PaymentsReport) -> String {
    let mut csv = String::from("date,student,amount,method,note\n");
    for line in &report.payments {
        let p = &line.payment;
        csv.push_str(&format!(
            "{},{},{:.2},{},{}\n",
            csv_quote(&p.payment_date),
            csv_quote(&line.student_name),
            p.amount_try,
            csv_quote(p.method.as_deref().unwrap_or("")),
            csv_quote(p.note.as_deref().unwrap_or("")),
        ));
    }
    csv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::PaymentInput;
    use crate::db::open_memory_db;
    use crate::directory::fixtures::*;
    use crate::directory::Lesson;
    use crate::ledger::{self, RecordRequest};

    fn mark(conn: &Connection, lesson: &Lesson, student_id: &str, status: &str, day: &str) {
        ledger::record_attendance(
            conn,
            &RecordRequest {
                lesson_id: lesson.id.clone(),
                student_id: student_id.to_string(),
                status: status.to_string(),
                occurred_at: Some(day.to_string()),
                note: None,
            },
        )
        .expect("record");
    }

    #[test]
    fn special_course_splits_student_total_from_payroll() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t = teacher(&conn, "Mert", "Kaya");
        let resim = directory::create_course(&conn, "Resim").expect("course");
        let l = lesson(&conn, &resim, &t, "2024-03-04");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-04");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-11");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-18");
        mark(&conn, &l, &s.id, "UNEXCUSED_ABSENT", "2024-03-25");

        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        assert_eq!(report.teachers.len(), 1);
        let row = &report.teachers[0].students[0];
        assert_eq!(row.tally.present, 3);
        assert_eq!(row.tally.unexcused_absent, 1);
        assert_eq!(row.tally.total, 4);
        assert_eq!(row.tally.payroll_total, 3);
        assert_eq!(report.teachers[0].tally.payroll_total, 3);
        assert_eq!(
            row.dates,
            vec!["04.03.2024", "11.03.2024", "18.03.2024", "25.03.2024"]
        );

        // Excused counts nowhere; makeup counts for both.
        mark(&conn, &l, &s.id, "EXCUSED_ABSENT", "2024-04-01");
        mark(&conn, &l, &s.id, "MAKEUP", "2024-04-08");
        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        let row = &report.teachers[0].students[0];
        assert_eq!(row.tally.excused_absent, 1);
        assert_eq!(row.tally.makeup, 1);
        assert_eq!(row.tally.total, 5);
        assert_eq!(row.tally.payroll_total, 4);
        assert_eq!(row.dates.len(), 6);
        assert_eq!(report.totals.payroll_total, 4);
    }

    #[test]
    fn unrenderable_date_format_is_an_error_not_a_panic() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t = teacher(&conn, "Mert", "Kaya");
        let bateri = directory::create_course(&conn, "Bateri").expect("course");
        let l = lesson(&conn, &bateri, &t, "2024-03-04");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-04");

        let cfg = ReportSettings {
            date_format: "%d.%m.%Y %H:%M".into(),
            ..Default::default()
        };
        let e = build_report(&conn, &ReportFilter::default(), &cfg).expect_err("time fields");
        assert_eq!(e.code(), "bad_params");
    }

    #[test]
    fn default_rule_pays_unexcused_but_not_excused() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t = teacher(&conn, "Mert", "Kaya");
        let keman = directory::create_course(&conn, "Keman").expect("course");
        let l = lesson(&conn, &keman, &t, "2024-03-04");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-04");
        mark(&conn, &l, &s.id, "UNEXCUSED_ABSENT", "2024-03-11");
        mark(&conn, &l, &s.id, "EXCUSED_ABSENT", "2024-03-18");
        mark(&conn, &l, &s.id, "MAKEUP", "2024-03-19");

        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        let tally = report.teachers[0].students[0].tally;
        assert_eq!(tally.excused_absent, 1);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.payroll_total, 3);
    }

    #[test]
    fn teachers_without_lessons_in_scope_are_omitted() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let busy = teacher(&conn, "Mert", "Kaya");
        teacher(&conn, "Selin", "Demir");
        let bateri = directory::create_course(&conn, "Bateri").expect("course");
        let keman = directory::create_course(&conn, "Keman").expect("course");
        let l = lesson(&conn, &bateri, &busy, "2024-03-04");
        mark(&conn, &l, &s.id, "PRESENT", "2024-03-04");

        let all = reconciliation(&conn, &ReportFilter::default()).expect("report");
        assert_eq!(all.teachers.len(), 1);
        assert_eq!(all.teachers[0].teacher_id, busy.id);

        let other_course = reconciliation(
            &conn,
            &ReportFilter {
                course_id: Some(keman.id.clone()),
                ..Default::default()
            },
        )
        .expect("report");
        assert!(other_course.teachers.is_empty());

        let out_of_range = reconciliation(
            &conn,
            &ReportFilter {
                start_date: NaiveDate::from_ymd_opt(2024, 4, 1),
                ..Default::default()
            },
        )
        .expect("report");
        assert!(out_of_range.teachers.is_empty());

        assert_eq!(
            reconciliation(
                &conn,
                &ReportFilter {
                    teacher_id: Some("missing".into()),
                    ..Default::default()
                }
            )
            .expect_err("unknown teacher")
            .code(),
            "not_found"
        );
    }

    #[test]
    fn missing_course_and_bad_status_are_skipped_not_fatal() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t = teacher(&conn, "Mert", "Kaya");
        let bateri = directory::create_course(&conn, "Bateri").expect("course");
        let gone = directory::create_course(&conn, "Gitar").expect("course");
        let kept = lesson(&conn, &bateri, &t, "2024-03-04");
        let dangling = lesson(&conn, &gone, &t, "2024-03-05");
        mark(&conn, &kept, &s.id, "PRESENT", "2024-03-04");
        mark(&conn, &dangling, &s.id, "PRESENT", "2024-03-05");
        directory::delete_course(&conn, &gone.id).expect("delete course");
        conn.execute(
            "INSERT INTO attendances(id, lesson_id, student_id, status, note, marked_at, marked_on)
             VALUES('odd', ?, ?, 'HOLIDAY', NULL, '2024-03-06T16:00:00', '2024-03-06')",
            (&kept.id, &s.id),
        )
        .expect("insert odd status");

        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        assert_eq!(report.skipped_events, 2);
        assert_eq!(report.teachers[0].students[0].tally.present, 1);
    }

    #[test]
    fn legacy_late_is_tallied_as_makeup() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        let t = teacher(&conn, "Mert", "Kaya");
        let c = directory::create_course(&conn, "Bateri").expect("course");
        let l = lesson(&conn, &c, &t, "2024-03-04");
        conn.execute(
            "INSERT INTO attendances(id, lesson_id, student_id, status, note, marked_at, marked_on)
             VALUES('legacy', ?, ?, 'LATE', NULL, '2024-03-04T16:00:00', '2024-03-04')",
            (&l.id, &s.id),
        )
        .expect("insert legacy");
        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        assert_eq!(report.teachers[0].students[0].tally.makeup, 1);
        assert_eq!(report.skipped_events, 0);
    }

    #[test]
    fn students_and_teachers_sort_by_last_then_first_name() {
        let conn = open_memory_db().expect("db");
        let zeynep = student(&conn, "Zeynep", "Arslan");
        let ali = student(&conn, "Ali", "Celik");
        let berk = student(&conn, "Berk", "Arslan");
        let t1 = teacher(&conn, "Ayse", "Yildiz");
        let t2 = teacher(&conn, "Mert", "Aksoy");
        let c = directory::create_course(&conn, "Bateri").expect("course");
        let l1 = lesson(&conn, &c, &t1, "2024-03-04");
        let l2 = lesson(&conn, &c, &t2, "2024-03-05");
        for s in [&zeynep, &ali, &berk] {
            mark(&conn, &l1, &s.id, "PRESENT", "2024-03-04");
        }
        mark(&conn, &l2, &ali.id, "PRESENT", "2024-03-05");

        let report = reconciliation(&conn, &ReportFilter::default()).expect("report");
        let teacher_names: Vec<_> = report.teachers.iter().map(|t| t.last_name.as_str()).collect();
        assert_eq!(teacher_names, vec!["Aksoy", "Yildiz"]);
        let names: Vec<_> = report.teachers[1]
            .students
            .iter()
            .map(|s| s.first_name.as_str())
            .collect();
        assert_eq!(names, vec!["Berk", "Zeynep", "Ali"]);
        assert_eq!(report.totals.present, 4);
    }

    #[test]
    fn payments_csv_quotes_and_totals() {
        let conn = open_memory_db().expect("db");
        let s = student(&conn, "Ada", "Yilmaz");
        billing::create_payment(
            &conn,
            &PaymentInput {
                student_id: s.id.clone(),
                amount_try: 1500.0,
                payment_date: Some("2024-03-01".into()),
                method: Some("EFT".into()),
                note: Some("mart, nisan".into()),
            },
        )
        .expect("payment");
        let report = payments_report(&conn, &PaymentFilter::default()).expect("report");
        assert_eq!(report.total_amount, 1500.0);
        assert_eq!(
            payments_csv(&report),
            "date,student,amount,method,note\n2024-03-01,Ada Yilmaz,1500.00,EFT,\"mart, nisan\"\n"
        );
    }
}
