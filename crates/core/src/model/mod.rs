mod course;
mod grade;
mod ids;
mod records;
mod tree;

pub use ids::{
    CourseId, ExamId, ExamQuestionId, LessonId, ModuleId, OptionId, ParseIdError, ProjectId,
    QuestionId, SubmissionId, UserId,
};

pub use course::{
    AnswerOption, AnswerType, Course, Exam, ExamQuestion, ExamQuestionKind, ExamScope, Lesson,
    LessonOwner, Module, PracticeQuestion, Project, StructuralRef, StructureError,
};
pub use grade::{GradeItemKind, GradeRecord};
pub use records::{
    Answer, Correctness, Enrollment, ExamAnswer, ExamSubmission, GradingFields, ItemScore,
    LearnerRecords, LessonCompletion, ModuleCompletion, PracticeSubmission, ProjectSubmission,
    UserProgress,
};
pub use tree::{CourseTree, ExamLocation, LessonLocation, LessonScope, ModuleTree};
