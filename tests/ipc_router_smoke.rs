mod test_support;

use serde_json::json;
use test_support::spawn_sidecar;

#[test]
fn data_methods_require_a_workspace() {
    let mut sc = spawn_sidecar();
    let health = sc.request_ok("health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    for method in [
        "students.list",
        "attendance.list",
        "billing.overview",
        "reports.reconciliation",
        "setup.get",
    ] {
        assert_eq!(sc.request_err(method, json!({})), "no_workspace", "{}", method);
    }
    assert_eq!(sc.request_err("workspace.select", json!({})), "bad_params");
}

#[test]
fn malformed_and_unknown_requests_get_error_replies() {
    let mut sc = spawn_sidecar();
    let bad = sc.send_raw("{not json");
    assert_eq!(bad.pointer("/error/code").and_then(|v| v.as_str()), Some("bad_json"));
    assert_eq!(sc.request_err("grades.compute", json!({})), "not_implemented");
    // The process keeps serving after both.
    sc.request_ok("health", json!({}));
}

#[test]
fn router_dispatch_covers_every_family() {
    let mut sc = spawn_sidecar();
    let ws = sc.open_workspace("piarted-router-smoke");
    let student = sc.create_student("Ada", "Yilmaz");
    let teacher = sc.create_teacher("Mert", "Kaya");
    let course = sc.create_course("Bateri");
    let lesson = sc.create_lesson(&course, &teacher, "2024-03-04");

    let calls = [
        ("setup.get", json!({})),
        ("students.get", json!({ "studentId": student })),
        ("teachers.students", json!({ "teacherId": teacher })),
        ("courses.list", json!({})),
        ("lessons.list", json!({ "teacherId": teacher })),
        ("lessons.assignStudent", json!({ "lessonId": lesson, "studentId": student })),
        ("lessons.students", json!({ "lessonId": lesson })),
        ("attendance.listForLesson", json!({ "lessonId": lesson })),
        ("attendance.listForStudent", json!({ "studentId": student })),
        ("attendance.list", json!({})),
        ("billing.status", json!({ "studentId": student })),
        ("billing.overview", json!({})),
        ("payments.list", json!({ "studentId": student })),
        ("reports.reconciliation", json!({})),
        ("reports.payments", json!({})),
        (
            "backup.exportWorkspace",
            json!({ "outPath": ws.join("smoke.zip").to_string_lossy() }),
        ),
    ];
    for (method, params) in calls {
        sc.request_ok(method, params);
    }
}

#[test]
fn missing_records_surface_not_found_with_details() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("piarted-router-not-found");
    let resp = sc.request("students.get", json!({ "studentId": "nope" }));
    assert_eq!(resp.pointer("/error/code").and_then(|v| v.as_str()), Some("not_found"));
    assert_eq!(
        resp.pointer("/error/details/entity").and_then(|v| v.as_str()),
        Some("student")
    );
    assert_eq!(
        sc.request_err("attendance.delete", json!({ "eventId": "nope" })),
        "not_found"
    );
    assert_eq!(
        sc.request_err("payments.delete", json!({ "paymentId": "nope" })),
        "not_found"
    );
}
