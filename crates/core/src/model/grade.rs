use chrono::{DateTime, Utc};

use crate::model::ids::UserId;

/// What a grade audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradeItemKind {
    PracticeQuestion,
    ModuleExam,
    FinalExam,
    Project,
}

impl GradeItemKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GradeItemKind::PracticeQuestion => "practice_question",
            GradeItemKind::ModuleExam => "module_exam",
            GradeItemKind::FinalExam => "final_exam",
            GradeItemKind::Project => "project",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "practice_question" => Some(Self::PracticeQuestion),
            "module_exam" => Some(Self::ModuleExam),
            "final_exam" => Some(Self::FinalExam),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

/// Append-only audit entry for a graded item.
///
/// Separate from the live submission rows: regrading appends a new entry
/// instead of touching old ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeRecord {
    /// Assigned by storage on append.
    pub id: Option<i64>,
    pub user_id: UserId,
    pub item_kind: GradeItemKind,
    pub item_id: u64,
    pub score: u32,
    pub max_score: u32,
    pub percentage: u8,
    pub passed: bool,
    pub grader_id: Option<UserId>,
    pub feedback: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_kind_storage_names_round_trip() {
        for kind in [
            GradeItemKind::PracticeQuestion,
            GradeItemKind::ModuleExam,
            GradeItemKind::FinalExam,
            GradeItemKind::Project,
        ] {
            assert_eq!(GradeItemKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(GradeItemKind::parse("quiz"), None);
    }
}
