use crate::directory::{self, LessonInput, StudentInput, StudentQuery, TeacherInput};
use crate::ipc::helpers::{
    from_params, optional_str, required_str, to_result, with_conn, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

// Students

fn students_create(conn: &Connection, params: &Value) -> HandlerResult {
    let input: StudentInput = from_params(params)?;
    to_result(&directory::create_student(conn, &input)?)
}

fn students_list(conn: &Connection, params: &Value) -> HandlerResult {
    let query: StudentQuery = if params.is_null() {
        StudentQuery::default()
    } else {
        from_params(params)?
    };
    to_result(&directory::list_students(conn, &query)?)
}

fn students_get(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "studentId")?;
    to_result(&directory::get_student(conn, &id)?)
}

fn students_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "studentId")?;
    let patch: StudentInput = from_params(params)?;
    to_result(&directory::update_student(conn, &id, &patch)?)
}

fn students_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "studentId")?;
    directory::delete_student(conn, &id)?;
    Ok(json!({ "ok": true }))
}

// Teachers

fn teachers_create(conn: &Connection, params: &Value) -> HandlerResult {
    let input: TeacherInput = from_params(params)?;
    to_result(&directory::create_teacher(conn, &input)?)
}

fn teachers_list(conn: &Connection, _params: &Value) -> HandlerResult {
    to_result(&directory::list_teachers(conn)?)
}

fn teachers_get(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "teacherId")?;
    to_result(&directory::get_teacher(conn, &id)?)
}

fn teachers_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "teacherId")?;
    let patch: TeacherInput = from_params(params)?;
    to_result(&directory::update_teacher(conn, &id, &patch)?)
}

fn teachers_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "teacherId")?;
    directory::delete_teacher(conn, &id)?;
    Ok(json!({ "ok": true }))
}

fn teachers_assign_student(conn: &Connection, params: &Value) -> HandlerResult {
    let teacher_id = required_str(params, "teacherId")?;
    let student_id = required_str(params, "studentId")?;
    let created = directory::assign_student_to_teacher(conn, &teacher_id, &student_id)?;
    Ok(json!({ "created": created }))
}

fn teachers_unassign_student(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let removed = directory::unassign_student_from_teacher(conn, &student_id)?;
    Ok(json!({ "removed": removed }))
}

fn teachers_students(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "teacherId")?;
    to_result(&directory::list_students_assigned_to_teacher(conn, &id)?)
}

// Courses & enrollments

fn courses_create(conn: &Connection, params: &Value) -> HandlerResult {
    let name = required_str(params, "name")?;
    to_result(&directory::create_course(conn, &name)?)
}

fn courses_list(conn: &Connection, _params: &Value) -> HandlerResult {
    to_result(&directory::list_courses(conn)?)
}

fn courses_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "courseId")?;
    let name = required_str(params, "name")?;
    to_result(&directory::rename_course(conn, &id, &name)?)
}

fn courses_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "courseId")?;
    directory::delete_course(conn, &id)?;
    Ok(json!({ "ok": true }))
}

fn enrollments_create(conn: &Connection, params: &Value) -> HandlerResult {
    let student_id = required_str(params, "studentId")?;
    let course_id = required_str(params, "courseId")?;
    let created = directory::enroll_student(conn, &student_id, &course_id)?;
    Ok(json!({ "created": created }))
}

// Lessons

fn lessons_create(conn: &Connection, params: &Value) -> HandlerResult {
    let input: LessonInput = from_params(params)?;
    to_result(&directory::create_lesson(conn, &input)?)
}

fn lessons_list(conn: &Connection, params: &Value) -> HandlerResult {
    let teacher_id = optional_str(params, "teacherId");
    let course_id = optional_str(params, "courseId");
    to_result(&directory::list_lessons(
        conn,
        teacher_id.as_deref(),
        course_id.as_deref(),
    )?)
}

fn lessons_get(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "lessonId")?;
    to_result(&directory::get_lesson(conn, &id)?)
}

fn lessons_update(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "lessonId")?;
    let patch: LessonInput = from_params(params)?;
    to_result(&directory::update_lesson(conn, &id, &patch)?)
}

fn lessons_delete(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "lessonId")?;
    directory::delete_lesson(conn, &id)?;
    Ok(json!({ "ok": true }))
}

fn lessons_assign_student(conn: &Connection, params: &Value) -> HandlerResult {
    let lesson_id = required_str(params, "lessonId")?;
    let student_id = required_str(params, "studentId")?;
    to_result(&directory::assign_student_to_lesson(
        conn,
        &lesson_id,
        &student_id,
    )?)
}

fn lessons_students(conn: &Connection, params: &Value) -> HandlerResult {
    let id = required_str(params, "lessonId")?;
    to_result(&directory::list_students_assigned_to_lesson(conn, &id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> HandlerResult = match req.method.as_str() {
        "students.create" => students_create,
        "students.list" => students_list,
        "students.get" => students_get,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "teachers.create" => teachers_create,
        "teachers.list" => teachers_list,
        "teachers.get" => teachers_get,
        "teachers.update" => teachers_update,
        "teachers.delete" => teachers_delete,
        "teachers.assignStudent" => teachers_assign_student,
        "teachers.unassignStudent" => teachers_unassign_student,
        "teachers.students" => teachers_students,
        "courses.create" => courses_create,
        "courses.list" => courses_list,
        "courses.update" => courses_update,
        "courses.delete" => courses_delete,
        "enrollments.create" => enrollments_create,
        "lessons.create" => lessons_create,
        "lessons.list" => lessons_list,
        "lessons.get" => lessons_get,
        "lessons.update" => lessons_update,
        "lessons.delete" => lessons_delete,
        "lessons.assignStudent" => lessons_assign_student,
        "lessons.students" => lessons_students,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
