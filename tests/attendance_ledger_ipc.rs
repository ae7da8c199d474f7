mod test_support;

use serde_json::json;
use test_support::spawn_sidecar;

#[test]
fn record_correct_delete_roundtrip() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("piarted-ledger-flow");
    let student = sc.create_student("Ada", "Yilmaz");
    let teacher = sc.create_teacher("Mert", "Kaya");
    let course = sc.create_course("Keman");
    let lesson = sc.create_lesson(&course, &teacher, "2024-03-04");

    let first = sc.mark(&lesson, &student, " present ", "2024-03-04");
    assert_eq!(first.get("created"), Some(&json!(true)));
    assert_eq!(first.pointer("/event/status"), Some(&json!("PRESENT")));
    assert_eq!(first.pointer("/event/markedAt"), Some(&json!("2024-03-04T16:00:00")));
    let event_id = first.pointer("/event/id").and_then(|v| v.as_str()).expect("id").to_string();

    // Recording links the student to the lesson.
    let on_lesson = sc.request_ok("lessons.students", json!({ "lessonId": lesson }));
    assert_eq!(on_lesson.as_array().map(|a| a.len()), Some(1));

    let same_day = sc.mark(&lesson, &student, "late", "2024-03-04T16:20");
    assert_eq!(same_day.get("created"), Some(&json!(false)));
    assert_eq!(same_day.pointer("/event/status"), Some(&json!("MAKEUP")));

    let corrected = sc.request_ok(
        "attendance.correct",
        json!({ "eventId": event_id, "status": "EXCUSED_ABSENT", "note": "doctor" }),
    );
    assert_eq!(corrected.get("status"), Some(&json!("EXCUSED_ABSENT")));
    assert_eq!(corrected.get("note"), Some(&json!("doctor")));

    let listed = sc.request_ok("attendance.listForLesson", json!({ "lessonId": lesson }));
    assert_eq!(listed.as_array().map(|a| a.len()), Some(1));

    assert_eq!(
        sc.request_err(
            "attendance.correct",
            json!({ "eventId": event_id, "status": "MAYBE" })
        ),
        "invalid_status"
    );

    let deleted = sc.request_ok("attendance.delete", json!({ "eventId": event_id }));
    assert_eq!(deleted.get("assignmentRetracted"), Some(&json!(true)));
    let on_lesson = sc.request_ok("lessons.students", json!({ "lessonId": lesson }));
    assert_eq!(on_lesson.as_array().map(|a| a.len()), Some(0));
}

#[test]
fn student_listing_filters_sorts_and_keeps_orphans() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("piarted-ledger-list");
    let student = sc.create_student("Ada", "Yilmaz");
    let teacher = sc.create_teacher("Mert", "Kaya");
    let bateri = sc.create_course("Bateri");
    let keman = sc.create_course("Keman");
    let drums = sc.create_lesson(&bateri, &teacher, "2024-03-04");
    let violin = sc.create_lesson(&keman, &teacher, "2024-03-05");
    sc.mark(&drums, &student, "PRESENT", "2024-03-04");
    sc.mark(&violin, &student, "UNEXCUSED_ABSENT", "2024-03-05");
    sc.mark(&drums, &student, "PRESENT", "2024-03-11");

    let filter = json!({ "studentId": student, "sort": "markedAtAsc" });
    let a = sc.request_ok("attendance.listForStudent", filter.clone());
    let b = sc.request_ok("attendance.listForStudent", filter);
    assert_eq!(a, b);
    let days: Vec<_> = a
        .as_array()
        .expect("array")
        .iter()
        .map(|e| e.get("markedOn").and_then(|v| v.as_str()).unwrap_or(""))
        .collect();
    assert_eq!(days, vec!["2024-03-04", "2024-03-05", "2024-03-11"]);

    let absent = sc.request_ok(
        "attendance.listForStudent",
        json!({ "studentId": student, "status": "absent" }),
    );
    assert_eq!(absent.as_array().map(|a| a.len()), Some(1));

    let drums_only = sc.request_ok(
        "attendance.listForStudent",
        json!({ "studentId": student, "courseId": bateri, "endDate": "2024-03-10" }),
    );
    assert_eq!(drums_only.as_array().map(|a| a.len()), Some(1));

    sc.request_ok("lessons.delete", json!({ "lessonId": drums }));
    let all = sc.request_ok("attendance.listForStudent", json!({ "studentId": student }));
    assert_eq!(all.as_array().map(|a| a.len()), Some(3));
    let by_teacher = sc.request_ok(
        "attendance.listForStudent",
        json!({ "studentId": student, "teacherId": teacher }),
    );
    assert_eq!(by_teacher.as_array().map(|a| a.len()), Some(1));

    assert_eq!(
        sc.request_err(
            "attendance.listForStudent",
            json!({ "studentId": student, "sort": "byMood" })
        ),
        "bad_params"
    );
}

#[test]
fn second_teacher_assignment_is_refused() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("piarted-ledger-teacher");
    let student = sc.create_student("Ada", "Yilmaz");
    let t1 = sc.create_teacher("Mert", "Kaya");
    let t2 = sc.create_teacher("Selin", "Demir");
    sc.request_ok("teachers.assignStudent", json!({ "teacherId": t1, "studentId": student }));
    assert_eq!(
        sc.request_err("teachers.assignStudent", json!({ "teacherId": t2, "studentId": student })),
        "constraint_violation"
    );
    let mine = sc.request_ok("teachers.students", json!({ "teacherId": t1 }));
    assert_eq!(mine.as_array().map(|a| a.len()), Some(1));
    assert_eq!(mine[0].get("id").and_then(|v| v.as_str()), Some(student.as_str()));
}

#[test]
fn delete_all_clears_the_ledger() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("piarted-ledger-delete-all");
    let student = sc.create_student("Ada", "Yilmaz");
    let teacher = sc.create_teacher("Mert", "Kaya");
    let course = sc.create_course("Bateri");
    let lesson = sc.create_lesson(&course, &teacher, "2024-03-04");
    sc.mark(&lesson, &student, "PRESENT", "2024-03-04");
    sc.mark(&lesson, &student, "PRESENT", "2024-03-11");

    let out = sc.request_ok("attendance.deleteAll", json!({}));
    assert_eq!(out.get("deleted"), Some(&json!(2)));
    assert_eq!(out.get("assignmentsRetracted"), Some(&json!(1)));
    let listed = sc.request_ok("attendance.list", json!({}));
    assert_eq!(listed.get("events").and_then(|v| v.as_array()).map(|a| a.len()), Some(0));
}
