use std::sync::Arc;

use tracing::info;

use mastermore_core::access::{Actor, Capability, authorize};
use mastermore_core::model::{
    Course, CourseId, CourseTree, Exam, ExamScope, Lesson, LessonOwner, Module, PracticeQuestion,
    Project, StructuralRef,
};
use storage::repository::{CourseRepository, StorageError};

use crate::error::CourseAdminError;

/// Maps an insert failure once positions were checked: a conflict can only be
/// a reused id, a missing row can only be the parent.
fn insert_err(err: StorageError, node: StructuralRef, parent: StructuralRef) -> CourseAdminError {
    match err {
        StorageError::Conflict => CourseAdminError::AlreadyExists(node),
        StorageError::NotFound => CourseAdminError::ParentNotFound(parent),
        other => CourseAdminError::Storage(other),
    }
}

fn check_position(
    taken: impl IntoIterator<Item = u32>,
    scope: StructuralRef,
    position: u32,
) -> Result<(), CourseAdminError> {
    if taken.into_iter().any(|p| p == position) {
        return Err(CourseAdminError::PositionTaken { scope, position });
    }
    Ok(())
}

/// Authoring operations. Every call needs `Capability::ManageContent`.
#[derive(Clone)]
pub struct CourseAdminService {
    courses: Arc<dyn CourseRepository>,
}

impl CourseAdminService {
    #[must_use]
    pub fn new(courses: Arc<dyn CourseRepository>) -> Self {
        Self { courses }
    }

    async fn tree_of(&self, parent: StructuralRef) -> Result<CourseTree, CourseAdminError> {
        let course = self
            .courses
            .locate(parent)
            .await?
            .ok_or(CourseAdminError::ParentNotFound(parent))?;
        Ok(self.courses.load_tree(course).await?)
    }

    /// # Errors
    ///
    /// Returns `CourseAdminError::AlreadyExists` if the id is taken.
    pub async fn create_course(
        &self,
        actor: &Actor,
        course: Course,
    ) -> Result<Course, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let node = StructuralRef::Course(course.id());
        self.courses
            .insert_course(&course)
            .await
            .map_err(|e| insert_err(e, node, node))?;
        info!(course = %course.id(), name = course.name(), "course created");
        Ok(course)
    }

    /// Publish or hide a course. Hidden courses cannot be enrolled in.
    ///
    /// # Errors
    ///
    /// Returns `CourseAdminError::ParentNotFound` for an unknown course.
    pub async fn publish_course(
        &self,
        actor: &Actor,
        id: CourseId,
        published: bool,
    ) -> Result<(), CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let node = StructuralRef::Course(id);
        self.courses
            .set_course_published(id, published)
            .await
            .map_err(|e| insert_err(e, node, node))?;
        info!(course = %id, published, "course visibility changed");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `CourseAdminError::PositionTaken` when another module of the
    /// course sits at the same position.
    pub async fn create_module(
        &self,
        actor: &Actor,
        module: Module,
    ) -> Result<Module, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let parent = StructuralRef::Course(module.course_id());
        let tree = self.tree_of(parent).await?;
        check_position(
            tree.modules().iter().map(|m| m.module().position()),
            parent,
            module.position(),
        )?;

        self.courses
            .insert_module(&module)
            .await
            .map_err(|e| insert_err(e, StructuralRef::Module(module.id()), parent))?;
        info!(course = %module.course_id(), module = %module.id(), "module created");
        Ok(module)
    }

    /// Add a lesson to a module, or directly to a course.
    ///
    /// # Errors
    ///
    /// Returns `CourseAdminError::PositionTaken` when the owner already has a
    /// lesson at that position.
    pub async fn create_lesson(
        &self,
        actor: &Actor,
        lesson: Lesson,
    ) -> Result<Lesson, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let parent = match lesson.owner() {
            LessonOwner::Course(id) => StructuralRef::Course(id),
            LessonOwner::Module(id) => StructuralRef::Module(id),
        };
        let tree = self.tree_of(parent).await?;
        let siblings = match lesson.owner() {
            LessonOwner::Course(_) => tree.direct_lessons(),
            LessonOwner::Module(id) => tree
                .module(id)
                .map(|m| m.lessons())
                .ok_or(CourseAdminError::ParentNotFound(parent))?,
        };
        check_position(siblings.iter().map(Lesson::position), parent, lesson.position())?;

        self.courses
            .insert_lesson(&lesson)
            .await
            .map_err(|e| insert_err(e, StructuralRef::Lesson(lesson.id()), parent))?;
        info!(lesson = %lesson.id(), %parent, "lesson created");
        Ok(lesson)
    }

    /// # Errors
    ///
    /// Returns `CourseAdminError::PositionTaken` when the module already has a
    /// question at that position.
    pub async fn create_practice_question(
        &self,
        actor: &Actor,
        question: PracticeQuestion,
    ) -> Result<PracticeQuestion, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let parent = StructuralRef::Module(question.module_id());
        let tree = self.tree_of(parent).await?;
        let siblings = tree
            .module(question.module_id())
            .map(|m| m.practice_questions())
            .ok_or(CourseAdminError::ParentNotFound(parent))?;
        check_position(
            siblings.iter().map(PracticeQuestion::position),
            parent,
            question.position(),
        )?;

        self.courses
            .insert_practice_question(&question)
            .await
            .map_err(|e| insert_err(e, StructuralRef::PracticeQuestion(question.id()), parent))?;
        info!(question = %question.id(), module = %question.module_id(), "practice question created");
        Ok(question)
    }

    /// Add a module exam, or the course's single final exam.
    ///
    /// # Errors
    ///
    /// Returns `CourseAdminError::AlreadyExists` when the course already has a
    /// final exam.
    pub async fn create_exam(&self, actor: &Actor, exam: Exam) -> Result<Exam, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let parent = match exam.scope() {
            ExamScope::Module(id) => StructuralRef::Module(id),
            ExamScope::Final(id) => StructuralRef::Course(id),
        };
        let tree = self.tree_of(parent).await?;
        if let (ExamScope::Final(_), Some(existing)) = (exam.scope(), tree.final_exam()) {
            return Err(CourseAdminError::AlreadyExists(StructuralRef::Exam(
                existing.id(),
            )));
        }

        self.courses
            .insert_exam(&exam)
            .await
            .map_err(|e| insert_err(e, StructuralRef::Exam(exam.id()), parent))?;
        info!(exam = %exam.id(), %parent, max_score = exam.max_score(), "exam created");
        Ok(exam)
    }

    /// # Errors
    ///
    /// Returns `CourseAdminError::PositionTaken` when the course already has a
    /// project at that position.
    pub async fn create_project(
        &self,
        actor: &Actor,
        project: Project,
    ) -> Result<Project, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        let parent = StructuralRef::Course(project.course_id());
        let tree = self.tree_of(parent).await?;
        check_position(
            tree.projects().iter().map(Project::position),
            parent,
            project.position(),
        )?;

        self.courses
            .insert_project(&project)
            .await
            .map_err(|e| insert_err(e, StructuralRef::Project(project.id()), parent))?;
        info!(project = %project.id(), course = %project.course_id(), "project created");
        Ok(project)
    }

    /// All courses, published or not, ordered by position.
    ///
    /// # Errors
    ///
    /// Returns `CourseAdminError::Storage` if repository access fails.
    pub async fn list_courses(&self, actor: &Actor) -> Result<Vec<Course>, CourseAdminError> {
        authorize(actor, Capability::ManageContent)?;
        Ok(self.courses.list_courses().await?)
    }
}
