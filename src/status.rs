use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed attendance vocabulary. Legacy spellings are folded in by
/// [`AttendanceStatus::parse`] before anything reaches the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    UnexcusedAbsent,
    ExcusedAbsent,
    Makeup,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::UnexcusedAbsent,
        AttendanceStatus::ExcusedAbsent,
        AttendanceStatus::Makeup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::UnexcusedAbsent => "UNEXCUSED_ABSENT",
            AttendanceStatus::ExcusedAbsent => "EXCUSED_ABSENT",
            AttendanceStatus::Makeup => "MAKEUP",
        }
    }

    /// Trim, case-fold, remap `LATE`/`ABSENT`, then validate.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let folded = raw.trim().to_ascii_uppercase();
        let canonical = match folded.as_str() {
            "LATE" => "MAKEUP",
            "ABSENT" => "UNEXCUSED_ABSENT",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == canonical)
            .ok_or_else(|| CoreError::InvalidStatus {
                raw: raw.to_string(),
            })
    }

    /// Counts toward the billing cycle (attended lessons).
    pub fn is_attended(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Makeup)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_folds_case_and_whitespace() {
        assert_eq!(
            AttendanceStatus::parse("  present ").expect("present"),
            AttendanceStatus::Present
        );
        assert_eq!(
            AttendanceStatus::parse("Excused_Absent").expect("excused"),
            AttendanceStatus::ExcusedAbsent
        );
    }

    #[test]
    fn legacy_spellings_are_remapped_not_rejected() {
        assert_eq!(
            AttendanceStatus::parse("late").expect("late"),
            AttendanceStatus::Makeup
        );
        assert_eq!(
            AttendanceStatus::parse("ABSENT").expect("absent"),
            AttendanceStatus::UnexcusedAbsent
        );
    }

    #[test]
    fn unknown_status_is_invalid() {
        let e = AttendanceStatus::parse("TELAFI").expect_err("should fail");
        assert_eq!(e.code(), "invalid_status");
        assert!(AttendanceStatus::parse("").is_err());
    }

    #[test]
    fn only_present_and_makeup_are_attended() {
        let attended: Vec<_> = AttendanceStatus::ALL
            .into_iter()
            .filter(|s| s.is_attended())
            .collect();
        assert_eq!(
            attended,
            vec![AttendanceStatus::Present, AttendanceStatus::Makeup]
        );
    }
}
