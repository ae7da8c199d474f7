//! Workspace settings: defaults merged over the JSON saved in `settings`.

use crate::dates;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::ledger::EventSort;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const DEFAULT_SPECIAL_COURSE: &str = "Resim";
pub const DEFAULT_REPORT_DATE_FORMAT: &str = "%d.%m.%Y";
pub const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Reports,
    Attendance,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Reports, SetupSection::Attendance];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Attendance => "attendance",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "specialCourseName": DEFAULT_SPECIAL_COURSE,
            "dateFormat": DEFAULT_REPORT_DATE_FORMAT
        }),
        SetupSection::Attendance => json!({
            "defaultSort": EventSort::MarkedAtDesc.as_str(),
            "defaultListLimit": 100
        }),
    }
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

/// Report dates are bare days, so the pattern must render one.
fn is_valid_date_format(fmt: &str) -> bool {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .and_then(|sample| dates::format_date_with(sample, fmt))
        .is_some()
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "specialCourseName" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 80)?));
                }
                "dateFormat" => {
                    let s = parse_string_max(v, k, 40)?;
                    if !is_valid_date_format(&s) {
                        return Err(format!("dateFormat is not a valid date format: {}", s));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "defaultSort" => {
                    let s = parse_string_max(v, k, 24)?;
                    let sort = EventSort::parse(&s).ok_or_else(|| {
                        "defaultSort must be one of: markedAtAsc, markedAtDesc, lessonDateAsc, lessonDateDesc"
                            .to_string()
                    })?;
                    obj.insert(k.clone(), Value::String(sort.as_str().to_string()));
                }
                "defaultListLimit" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_LIST_LIMIT)?),
                    );
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> CoreResult<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Saved values are applied field by field; a bad one keeps its default.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(section = section.name(), %msg, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

/// Validates the whole patch before anything is written.
pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> CoreResult<Value> {
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(CoreError::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(current)
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub special_course_name: String,
    pub date_format: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            special_course_name: DEFAULT_SPECIAL_COURSE.to_string(),
            date_format: DEFAULT_REPORT_DATE_FORMAT.to_string(),
        }
    }
}

pub fn report_settings(conn: &Connection) -> CoreResult<ReportSettings> {
    let v = load_section(conn, SetupSection::Reports)?;
    let defaults = ReportSettings::default();
    Ok(ReportSettings {
        special_course_name: v
            .get("specialCourseName")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.special_course_name),
        date_format: v
            .get("dateFormat")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.date_format),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct AttendanceSettings {
    pub default_sort: EventSort,
    pub default_list_limit: u32,
}

pub fn attendance_settings(conn: &Connection) -> CoreResult<AttendanceSettings> {
    let v = load_section(conn, SetupSection::Attendance)?;
    Ok(AttendanceSettings {
        default_sort: v
            .get("defaultSort")
            .and_then(|x| x.as_str())
            .and_then(EventSort::parse)
            .unwrap_or(EventSort::MarkedAtDesc),
        default_list_limit: v
            .get("defaultListLimit")
            .and_then(|x| x.as_u64())
            .map(|n| n as u32)
            .unwrap_or(100),
    })
}
