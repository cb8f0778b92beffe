//! Sequential unlock rules for modules, lessons and exams, and the course
//! percentage.
//!
//! Everything here is a pure function of a `CourseTree` and one learner's
//! `LearnerRecords`. "Accessible" and "completed" are independent: a module can
//! be open without being finished.

use serde::Serialize;

use crate::model::{
    CourseId, CourseTree, ExamId, LearnerRecords, Lesson, LessonId, LessonLocation, LessonScope,
    ModuleId, ModuleTree, ProjectId, QuestionId,
};

/// The first module is always open; any other module opens once the module
/// right before it has a completion record.
#[must_use]
pub fn is_module_accessible(
    course: &CourseTree,
    module_index: usize,
    records: &LearnerRecords,
) -> bool {
    if module_index == 0 {
        return true;
    }
    course
        .modules()
        .get(module_index - 1)
        .is_some_and(|previous| records.has_completed_module(previous.id()))
}

/// Same rule as modules, applied inside one ordered lesson list.
///
/// `ordered_lessons` is a single scope (one module, or the course's direct
/// lessons); scopes are never chained together.
#[must_use]
pub fn is_lesson_accessible(
    ordered_lessons: &[Lesson],
    lesson_index: usize,
    records: &LearnerRecords,
) -> bool {
    if lesson_index == 0 {
        return true;
    }
    ordered_lessons
        .get(lesson_index - 1)
        .is_some_and(|previous| records.has_completed_lesson(previous.id()))
}

/// A lesson can be opened when it is open in its own list and, for module
/// lessons, its module is open too.
#[must_use]
pub fn is_lesson_reachable(
    course: &CourseTree,
    location: LessonLocation,
    records: &LearnerRecords,
) -> bool {
    let module_open = match location.scope {
        LessonScope::Course => true,
        LessonScope::Module(index) => is_module_accessible(course, index, records),
    };
    module_open
        && is_lesson_accessible(course.scope_lessons(location.scope), location.index, records)
}

/// Every lesson of the module is completed and every practice question has a
/// submission. Modules with nothing to do are trivially eligible.
#[must_use]
pub fn is_exam_eligible(module: &ModuleTree, records: &LearnerRecords) -> bool {
    module
        .lessons()
        .iter()
        .all(|l| records.has_completed_lesson(l.id()))
        && module
            .practice_questions()
            .iter()
            .all(|q| records.has_submitted_practice(q.id()))
}

/// Exams allow a single attempt.
#[must_use]
pub fn can_take_exam(module: &ModuleTree, exam_id: ExamId, records: &LearnerRecords) -> bool {
    module.exam(exam_id).is_some()
        && !records.has_attempted_exam(exam_id)
        && is_exam_eligible(module, records)
}

/// The final exam opens once every module is completed.
#[must_use]
pub fn is_final_exam_eligible(course: &CourseTree, records: &LearnerRecords) -> bool {
    course
        .modules()
        .iter()
        .all(|m| records.has_completed_module(m.id()))
}

/// `round(completed / total * 100)`, halves rounding up. An empty lesson list
/// is 0%, not an error.
#[must_use]
pub fn compute_course_progress<'a>(
    lessons: impl IntoIterator<Item = &'a Lesson>,
    records: &LearnerRecords,
) -> u8 {
    let (total, completed) = lessons
        .into_iter()
        .fold((0_u64, 0_u64), |(total, completed), lesson| {
            let done = u64::from(records.has_completed_lesson(lesson.id()));
            (total + 1, completed + done)
        });

    if total == 0 {
        return 0;
    }

    let rounded = (completed * 200 + total) / (total * 2);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// All lessons completed, all practice questions submitted (graded or
/// pending) and every module exam passed. A module with no exams satisfies
/// the exam clause vacuously.
#[must_use]
pub fn is_module_completion_eligible(module: &ModuleTree, records: &LearnerRecords) -> bool {
    is_exam_eligible(module, records)
        && module
            .exams()
            .iter()
            .all(|e| records.has_passed_exam(e.id()))
}

/// Derived state implied by a learner's current records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settlement {
    /// Modules that became eligible and had no completion record yet.
    pub completed_modules: Vec<ModuleId>,
    pub percentage: u8,
    /// The course reached 100% while the enrollment was still open.
    pub course_completed: bool,
}

/// Work out which modules are now complete, the course percentage and whether
/// the enrollment should close. Newly completed modules are added to
/// `records`, in module order.
pub fn settle(
    course: &CourseTree,
    records: &mut LearnerRecords,
    enrollment_open: bool,
) -> Settlement {
    let mut completed_modules = Vec::new();
    for module in course.modules() {
        if !records.has_completed_module(module.id())
            && is_module_completion_eligible(module, records)
        {
            records.record_module(module.id());
            completed_modules.push(module.id());
        }
    }

    let percentage = compute_course_progress(course.all_lessons(), records);
    Settlement {
        completed_modules,
        percentage,
        course_completed: enrollment_open && percentage == 100,
    }
}

//
// ─── OUTLINE ───────────────────────────────────────────────────────────────────
//

/// Lock/checkmark state of one node, as rendered by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub is_accessible: bool,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonOutline {
    pub lesson_id: LessonId,
    pub title: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeOutline {
    pub question_id: QuestionId,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamOutline {
    pub exam_id: ExamId,
    pub title: String,
    pub status: NodeStatus,
    pub attempted: bool,
    /// `None` until graded.
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleOutline {
    pub module_id: ModuleId,
    pub title: String,
    pub status: NodeStatus,
    pub lessons: Vec<LessonOutline>,
    pub practice: Vec<PracticeOutline>,
    pub exams: Vec<ExamOutline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectOutline {
    pub project_id: ProjectId,
    pub title: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOutline {
    pub course_id: CourseId,
    pub name: String,
    pub percentage: u8,
    pub lessons: Vec<LessonOutline>,
    pub modules: Vec<ModuleOutline>,
    pub projects: Vec<ProjectOutline>,
    pub final_exam: Option<ExamOutline>,
}

fn lesson_outlines(
    lessons: &[Lesson],
    scope_open: bool,
    records: &LearnerRecords,
) -> Vec<LessonOutline> {
    lessons
        .iter()
        .enumerate()
        .map(|(index, lesson)| LessonOutline {
            lesson_id: lesson.id(),
            title: lesson.title().to_owned(),
            status: NodeStatus {
                is_accessible: scope_open && is_lesson_accessible(lessons, index, records),
                is_completed: records.has_completed_lesson(lesson.id()),
            },
        })
        .collect()
}

/// Full view model for one learner and one course.
#[must_use]
pub fn outline(course: &CourseTree, records: &LearnerRecords) -> CourseOutline {
    let modules = course
        .modules()
        .iter()
        .enumerate()
        .map(|(index, module)| {
            let open = is_module_accessible(course, index, records);
            let exams_open = open && is_exam_eligible(module, records);

            ModuleOutline {
                module_id: module.id(),
                title: module.module().title().to_owned(),
                status: NodeStatus {
                    is_accessible: open,
                    is_completed: records.has_completed_module(module.id()),
                },
                lessons: lesson_outlines(module.lessons(), open, records),
                practice: module
                    .practice_questions()
                    .iter()
                    .map(|q| PracticeOutline {
                        question_id: q.id(),
                        status: NodeStatus {
                            is_accessible: open,
                            is_completed: records.has_submitted_practice(q.id()),
                        },
                    })
                    .collect(),
                exams: module
                    .exams()
                    .iter()
                    .map(|exam| ExamOutline {
                        exam_id: exam.id(),
                        title: exam.title().to_owned(),
                        status: NodeStatus {
                            is_accessible: exams_open,
                            is_completed: records.has_passed_exam(exam.id()),
                        },
                        attempted: records.has_attempted_exam(exam.id()),
                        passed: records.exam_result(exam.id()),
                    })
                    .collect(),
            }
        })
        .collect();

    let final_open = is_final_exam_eligible(course, records);

    CourseOutline {
        course_id: course.course().id(),
        name: course.course().name().to_owned(),
        percentage: compute_course_progress(course.all_lessons(), records),
        lessons: lesson_outlines(course.direct_lessons(), true, records),
        modules,
        projects: course
            .projects()
            .iter()
            .map(|p| ProjectOutline {
                project_id: p.id(),
                title: p.title().to_owned(),
                status: NodeStatus {
                    is_accessible: true,
                    is_completed: records.has_passed_project(p.id()),
                },
            })
            .collect(),
        final_exam: course.final_exam().map(|exam| ExamOutline {
            exam_id: exam.id(),
            title: exam.title().to_owned(),
            status: NodeStatus {
                is_accessible: final_open,
                is_completed: records.has_passed_exam(exam.id()),
            },
            attempted: records.has_attempted_exam(exam.id()),
            passed: records.exam_result(exam.id()),
        }),
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AnswerType, Correctness, Course, Exam, ExamScope, LessonOwner, Module, PracticeQuestion,
    };

    fn lesson(id: u64, owner: LessonOwner, position: u32) -> Lesson {
        Lesson::new(LessonId::new(id), owner, position, format!("Lesson {id}"), "").unwrap()
    }

    fn module_tree(id: u64, position: u32, lesson_ids: &[u64]) -> ModuleTree {
        let module = Module::new(
            ModuleId::new(id),
            CourseId::new(1),
            position,
            format!("Module {id}"),
            None,
        )
        .unwrap();
        let owner = LessonOwner::Module(ModuleId::new(id));
        let lessons = lesson_ids
            .iter()
            .zip(1..)
            .map(|(lid, pos)| lesson(*lid, owner, pos))
            .collect();
        ModuleTree::new(module, lessons, Vec::new(), Vec::new()).unwrap()
    }

    fn course_with(modules: Vec<ModuleTree>, direct: Vec<Lesson>) -> CourseTree {
        let course = Course::new(CourseId::new(1), "Go", None, 1, true).unwrap();
        CourseTree::new(course, modules, direct, Vec::new(), None).unwrap()
    }

    fn full_module() -> ModuleTree {
        let module = Module::new(ModuleId::new(1), CourseId::new(1), 1, "Basics", None).unwrap();
        let coding = PracticeQuestion::new(
            QuestionId::new(1),
            ModuleId::new(1),
            1,
            "Write hello world",
            AnswerType::Coding,
            5,
            Vec::new(),
        )
        .unwrap();
        let exam = Exam::new(
            ExamId::new(1),
            ExamScope::Module(ModuleId::new(1)),
            "Basics quiz",
            70,
            30,
            Vec::new(),
        )
        .unwrap();
        ModuleTree::new(
            module,
            vec![lesson(1, LessonOwner::Module(ModuleId::new(1)), 1)],
            vec![coding],
            vec![exam],
        )
        .unwrap()
    }

    #[test]
    fn first_module_is_always_accessible() {
        let course = course_with(vec![module_tree(1, 1, &[]), module_tree(2, 2, &[])], Vec::new());
        assert!(is_module_accessible(&course, 0, &LearnerRecords::new()));

        let mut records = LearnerRecords::new();
        records.record_module(ModuleId::new(2));
        assert!(is_module_accessible(&course, 0, &records));
    }

    #[test]
    fn module_unlocks_exactly_when_previous_completes() {
        let course = course_with(
            vec![
                module_tree(1, 1, &[]),
                module_tree(2, 2, &[]),
                module_tree(3, 3, &[]),
            ],
            Vec::new(),
        );
        let mut records = LearnerRecords::new();
        assert!(!is_module_accessible(&course, 2, &records));

        // Completing module 2 alone opens module 3; module 1 is not re-checked.
        records.record_module(ModuleId::new(2));
        assert!(is_module_accessible(&course, 2, &records));
        assert!(!is_module_accessible(&course, 1, &records));
    }

    #[test]
    fn lesson_needs_previous_lesson_in_same_scope() {
        let direct = vec![
            lesson(1, LessonOwner::Course(CourseId::new(1)), 1),
            lesson(2, LessonOwner::Course(CourseId::new(1)), 2),
        ];
        let mut records = LearnerRecords::new();
        assert!(is_lesson_accessible(&direct, 0, &records));
        assert!(!is_lesson_accessible(&direct, 1, &records));

        records.record_lesson(LessonId::new(1));
        assert!(is_lesson_accessible(&direct, 1, &records));
    }

    #[test]
    fn module_lessons_do_not_chain_across_modules() {
        let course = course_with(
            vec![module_tree(1, 1, &[10, 11]), module_tree(2, 2, &[20])],
            Vec::new(),
        );
        let mut records = LearnerRecords::new();
        records.record_module(ModuleId::new(1));

        // First lesson of module 2 depends on the module being open, not on lesson 11.
        let location = course.locate_lesson(LessonId::new(20)).unwrap();
        assert!(is_lesson_reachable(&course, location, &records));

        let locked = course.locate_lesson(LessonId::new(11)).unwrap();
        assert!(!is_lesson_reachable(&course, locked, &records));
    }

    #[test]
    fn progress_is_zero_for_empty_course_and_rounds_half_up() {
        let records = LearnerRecords::new();
        assert_eq!(compute_course_progress(std::iter::empty::<&Lesson>(), &records), 0);

        let lessons: Vec<Lesson> = (1..=8)
            .map(|i| lesson(i, LessonOwner::Course(CourseId::new(1)), u32::try_from(i).unwrap()))
            .collect();
        let mut records = LearnerRecords::new();
        records.record_lesson(LessonId::new(1));
        // 1/8 = 12.5%
        assert_eq!(compute_course_progress(&lessons, &records), 13);

        let thirds: Vec<Lesson> = lessons[..3].to_vec();
        records.record_lesson(LessonId::new(2));
        // 2/3 = 66.67%
        assert_eq!(compute_course_progress(&thirds, &records), 67);
    }

    #[test]
    fn progress_is_monotonic_and_reaches_100() {
        let course = course_with(vec![module_tree(1, 1, &[1, 2, 3])], Vec::new());
        let mut records = LearnerRecords::new();
        let mut last = compute_course_progress(course.all_lessons(), &records);
        assert_eq!(last, 0);

        for id in [1, 1, 2, 3, 3] {
            records.record_lesson(LessonId::new(id));
            let now = compute_course_progress(course.all_lessons(), &records);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn progress_counts_direct_and_module_lessons() {
        let course = course_with(
            vec![module_tree(1, 1, &[2])],
            vec![lesson(1, LessonOwner::Course(CourseId::new(1)), 1)],
        );
        let mut records = LearnerRecords::new();
        records.record_lesson(LessonId::new(2));
        assert_eq!(compute_course_progress(course.all_lessons(), &records), 50);
    }

    #[test]
    fn empty_module_is_vacuously_complete() {
        let module = module_tree(1, 1, &[]);
        assert!(is_module_completion_eligible(&module, &LearnerRecords::new()));
        assert!(is_exam_eligible(&module, &LearnerRecords::new()));
    }

    #[test]
    fn exam_eligibility_and_module_completion() {
        let module = full_module();
        let mut records = LearnerRecords::new();
        assert!(!is_exam_eligible(&module, &records));

        records.record_lesson(LessonId::new(1));
        assert!(!is_exam_eligible(&module, &records));

        // A pending coding answer still counts as submitted.
        records.record_practice(QuestionId::new(1), Correctness::Pending);
        assert!(is_exam_eligible(&module, &records));
        assert!(can_take_exam(&module, ExamId::new(1), &records));
        assert!(!is_module_completion_eligible(&module, &records));

        records.record_exam(ExamId::new(1), None);
        assert!(!can_take_exam(&module, ExamId::new(1), &records));
        assert!(!is_module_completion_eligible(&module, &records));

        records.record_exam(ExamId::new(1), Some(true));
        assert!(is_module_completion_eligible(&module, &records));
    }

    #[test]
    fn failed_exam_blocks_module_completion() {
        let module = full_module();
        let mut records = LearnerRecords::new();
        records.record_lesson(LessonId::new(1));
        records.record_practice(QuestionId::new(1), Correctness::Incorrect);
        records.record_exam(ExamId::new(1), Some(false));
        assert!(!is_module_completion_eligible(&module, &records));
    }

    #[test]
    fn final_exam_needs_every_module() {
        let course = course_with(vec![module_tree(1, 1, &[]), module_tree(2, 2, &[])], Vec::new());
        let mut records = LearnerRecords::new();
        records.record_module(ModuleId::new(1));
        assert!(!is_final_exam_eligible(&course, &records));
        records.record_module(ModuleId::new(2));
        assert!(is_final_exam_eligible(&course, &records));
    }

    #[test]
    fn outline_reports_locks_and_percentage() {
        let course = course_with(vec![module_tree(1, 1, &[1, 2]), module_tree(2, 2, &[3])], Vec::new());
        let mut records = LearnerRecords::new();
        records.record_lesson(LessonId::new(1));

        let view = outline(&course, &records);
        assert_eq!(view.percentage, 33);
        assert!(view.modules[0].status.is_accessible);
        assert!(!view.modules[0].status.is_completed);
        assert!(view.modules[0].lessons[1].status.is_accessible);
        assert!(!view.modules[1].status.is_accessible);
        assert!(!view.modules[1].lessons[0].status.is_accessible);
    }

    #[test]
    fn settle_completes_modules_and_the_course() {
        let course = course_with(
            vec![module_tree(1, 1, &[10]), module_tree(2, 2, &[20])],
            vec![lesson(1, LessonOwner::Course(CourseId::new(1)), 1)],
        );
        let mut records = LearnerRecords::new();
        records.record_lesson(LessonId::new(1));
        records.record_lesson(LessonId::new(10));

        let partial = settle(&course, &mut records, true);
        assert_eq!(partial.completed_modules, vec![ModuleId::new(1)]);
        assert_eq!(partial.percentage, 67);
        assert!(!partial.course_completed);
        assert!(records.has_completed_module(ModuleId::new(1)));

        records.record_lesson(LessonId::new(20));
        let done = settle(&course, &mut records, true);
        assert_eq!(done.completed_modules, vec![ModuleId::new(2)]);
        assert_eq!(done.percentage, 100);
        assert!(done.course_completed);

        let closed = settle(&course, &mut records, false);
        assert!(closed.completed_modules.is_empty());
        assert!(!closed.course_completed);
    }
}
