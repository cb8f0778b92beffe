use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an ID from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying u64 value
            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name::new)
                    .map_err(|_| ParseIdError {
                        kind: stringify!($name),
                    })
            }
        }
    };
}

define_id!(
    /// Unique identifier for a learner, grader or administrator.
    UserId
);
define_id!(
    /// Unique identifier for a Course
    CourseId
);
define_id!(
    /// Unique identifier for a Module
    ModuleId
);
define_id!(
    /// Unique identifier for a Lesson
    LessonId
);
define_id!(
    /// Unique identifier for a practice question inside a module.
    QuestionId
);
define_id!(
    /// Unique identifier for an answer option of a choice question.
    OptionId
);
define_id!(
    /// Unique identifier for a module exam or a course final exam.
    ExamId
);
define_id!(
    /// Unique identifier for a question inside an exam.
    ExamQuestionId
);
define_id!(
    /// Unique identifier for a Project
    ProjectId
);
define_id!(
    /// Unique identifier for an exam or project submission.
    SubmissionId
);

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prints_raw_value() {
        assert_eq!(CourseId::new(42).to_string(), "42");
        assert_eq!(LessonId::new(7).to_string(), "7");
    }

    #[test]
    fn debug_includes_type_name() {
        assert_eq!(format!("{:?}", ModuleId::new(3)), "ModuleId(3)");
        assert_eq!(format!("{:?}", SubmissionId::new(11)), "SubmissionId(11)");
    }

    #[test]
    fn from_str_accepts_padded_numbers() {
        let id: UserId = " 123 ".parse().unwrap();
        assert_eq!(id, UserId::new(123));
    }

    #[test]
    fn from_str_rejects_garbage() {
        let err = "not-a-number".parse::<ExamId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse ExamId from string");
    }

    #[test]
    fn ids_order_by_value() {
        let mut ids = vec![ProjectId::new(3), ProjectId::new(1), ProjectId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ProjectId::new(1), ProjectId::new(2), ProjectId::new(3)]);
    }
}
