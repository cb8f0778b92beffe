use crate::model::course::{
    Course, Exam, ExamScope, Lesson, LessonOwner, Module, PracticeQuestion, Project,
    StructuralRef, StructureError, sort_by_position,
};
use crate::model::ids::{ExamId, LessonId, ModuleId, ProjectId, QuestionId};

/// A module with its ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTree {
    module: Module,
    lessons: Vec<Lesson>,
    practice_questions: Vec<PracticeQuestion>,
    exams: Vec<Exam>,
}

impl ModuleTree {
    /// Assemble a module subtree, sorting lessons and practice questions by
    /// position. Exams are ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::ForeignChild` if a child points at another
    /// module, or `StructureError::DuplicatePosition` on ordering ties.
    pub fn new(
        module: Module,
        mut lessons: Vec<Lesson>,
        mut practice_questions: Vec<PracticeQuestion>,
        mut exams: Vec<Exam>,
    ) -> Result<Self, StructureError> {
        let parent = StructuralRef::Module(module.id());

        for lesson in &lessons {
            if lesson.owner() != LessonOwner::Module(module.id()) {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Lesson(lesson.id()),
                    parent,
                });
            }
        }
        for question in &practice_questions {
            if question.module_id() != module.id() {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::PracticeQuestion(question.id()),
                    parent,
                });
            }
        }
        for exam in &exams {
            if exam.scope() != ExamScope::Module(module.id()) {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Exam(exam.id()),
                    parent,
                });
            }
        }

        sort_by_position(&mut lessons, parent, Lesson::position)?;
        sort_by_position(&mut practice_questions, parent, PracticeQuestion::position)?;
        exams.sort_by_key(Exam::id);

        Ok(Self {
            module,
            lessons,
            practice_questions,
            exams,
        })
    }

    #[must_use]
    pub fn module(&self) -> &Module {
        &self.module
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.module.id()
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn practice_questions(&self) -> &[PracticeQuestion] {
        &self.practice_questions
    }

    #[must_use]
    pub fn exams(&self) -> &[Exam] {
        &self.exams
    }

    #[must_use]
    pub fn exam(&self, id: ExamId) -> Option<&Exam> {
        self.exams.iter().find(|e| e.id() == id)
    }
}

/// Which ordered lesson list a lesson belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonScope {
    /// Legacy lessons attached directly to the course.
    Course,
    /// Lessons of the module at this index in `CourseTree::modules`.
    Module(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonLocation {
    pub scope: LessonScope,
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum ExamLocation<'a> {
    Module { module_index: usize, exam: &'a Exam },
    Final(&'a Exam),
}

impl<'a> ExamLocation<'a> {
    #[must_use]
    pub fn exam(&self) -> &'a Exam {
        match self {
            ExamLocation::Module { exam, .. } | ExamLocation::Final(exam) => exam,
        }
    }
}

/// Structural tree of one course: the read model the progression rules run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseTree {
    course: Course,
    modules: Vec<ModuleTree>,
    lessons: Vec<Lesson>,
    projects: Vec<Project>,
    final_exam: Option<Exam>,
}

impl CourseTree {
    /// Assemble a course tree. Modules, direct lessons and projects are sorted
    /// by position.
    ///
    /// # Errors
    ///
    /// Returns `StructureError::ForeignChild` if any child belongs to another
    /// course, or `StructureError::DuplicatePosition` on ordering ties.
    pub fn new(
        course: Course,
        mut modules: Vec<ModuleTree>,
        mut lessons: Vec<Lesson>,
        mut projects: Vec<Project>,
        final_exam: Option<Exam>,
    ) -> Result<Self, StructureError> {
        let parent = StructuralRef::Course(course.id());

        for module in &modules {
            if module.module().course_id() != course.id() {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Module(module.id()),
                    parent,
                });
            }
        }
        for lesson in &lessons {
            if lesson.owner() != LessonOwner::Course(course.id()) {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Lesson(lesson.id()),
                    parent,
                });
            }
        }
        for project in &projects {
            if project.course_id() != course.id() {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Project(project.id()),
                    parent,
                });
            }
        }
        if let Some(exam) = &final_exam {
            if exam.scope() != ExamScope::Final(course.id()) {
                return Err(StructureError::ForeignChild {
                    child: StructuralRef::Exam(exam.id()),
                    parent,
                });
            }
        }

        sort_by_position(&mut modules, parent, |m| m.module().position())?;
        sort_by_position(&mut lessons, parent, Lesson::position)?;
        sort_by_position(&mut projects, parent, Project::position)?;

        Ok(Self {
            course,
            modules,
            lessons,
            projects,
            final_exam,
        })
    }

    #[must_use]
    pub fn course(&self) -> &Course {
        &self.course
    }

    #[must_use]
    pub fn modules(&self) -> &[ModuleTree] {
        &self.modules
    }

    /// Legacy lessons attached directly to the course.
    #[must_use]
    pub fn direct_lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    #[must_use]
    pub fn final_exam(&self) -> Option<&Exam> {
        self.final_exam.as_ref()
    }

    /// Every lesson of the course: direct lessons first, then module lessons
    /// in module order.
    pub fn all_lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.lessons
            .iter()
            .chain(self.modules.iter().flat_map(|m| m.lessons().iter()))
    }

    #[must_use]
    pub fn module(&self, id: ModuleId) -> Option<&ModuleTree> {
        self.modules.iter().find(|m| m.id() == id)
    }

    /// Ordered lesson list for a scope. Out-of-range module indexes yield an
    /// empty slice.
    #[must_use]
    pub fn scope_lessons(&self, scope: LessonScope) -> &[Lesson] {
        match scope {
            LessonScope::Course => &self.lessons,
            LessonScope::Module(index) => self
                .modules
                .get(index)
                .map_or(&[][..], ModuleTree::lessons),
        }
    }

    #[must_use]
    pub fn locate_lesson(&self, id: LessonId) -> Option<LessonLocation> {
        if let Some(index) = self.lessons.iter().position(|l| l.id() == id) {
            return Some(LessonLocation {
                scope: LessonScope::Course,
                index,
            });
        }
        self.modules
            .iter()
            .enumerate()
            .find_map(|(module_index, module)| {
                module
                    .lessons()
                    .iter()
                    .position(|l| l.id() == id)
                    .map(|index| LessonLocation {
                        scope: LessonScope::Module(module_index),
                        index,
                    })
            })
    }

    /// Returns the owning module index and the question.
    #[must_use]
    pub fn locate_question(&self, id: QuestionId) -> Option<(usize, &PracticeQuestion)> {
        self.modules
            .iter()
            .enumerate()
            .find_map(|(module_index, module)| {
                module
                    .practice_questions()
                    .iter()
                    .find(|q| q.id() == id)
                    .map(|q| (module_index, q))
            })
    }

    #[must_use]
    pub fn locate_exam(&self, id: ExamId) -> Option<ExamLocation<'_>> {
        if let Some(exam) = self.final_exam.as_ref().filter(|e| e.id() == id) {
            return Some(ExamLocation::Final(exam));
        }
        self.modules
            .iter()
            .enumerate()
            .find_map(|(module_index, module)| {
                module
                    .exam(id)
                    .map(|exam| ExamLocation::Module { module_index, exam })
            })
    }

    #[must_use]
    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| p.id() == id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
