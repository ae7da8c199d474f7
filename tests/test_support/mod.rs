#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_piarted");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn piarted");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_default()
    }

    /// Returns the error code.
    pub fn request_err(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }

    pub fn open_workspace(&mut self, prefix: &str) -> PathBuf {
        let workspace = temp_dir(prefix);
        self.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        workspace
    }

    pub fn create_student(&mut self, first: &str, last: &str) -> String {
        let s = self.request_ok("students.create", json!({ "firstName": first, "lastName": last }));
        id_of(&s)
    }

    pub fn create_teacher(&mut self, first: &str, last: &str) -> String {
        let t = self.request_ok("teachers.create", json!({ "firstName": first, "lastName": last }));
        id_of(&t)
    }

    pub fn create_course(&mut self, name: &str) -> String {
        let c = self.request_ok("courses.create", json!({ "name": name }));
        id_of(&c)
    }

    pub fn create_lesson(&mut self, course_id: &str, teacher_id: &str, date: &str) -> String {
        let l = self.request_ok(
            "lessons.create",
            json!({
                "courseId": course_id,
                "teacherId": teacher_id,
                "lessonDate": date,
                "startTime": "16:00"
            }),
        );
        id_of(&l)
    }

    pub fn mark(&mut self, lesson_id: &str, student_id: &str, status: &str, day: &str) -> serde_json::Value {
        self.request_ok(
            "attendance.record",
            json!({
                "lessonId": lesson_id,
                "studentId": student_id,
                "status": status,
                "occurredAt": day
            }),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn id_of(v: &serde_json::Value) -> String {
    v.get("id")
        .and_then(|x| x.as_str())
        .expect("id field")
        .to_string()
}
