use mastermore_core::model::{
    Course, CourseId, CourseTree, Exam, ExamScope, Lesson, LessonOwner, Module, ModuleTree,
    PracticeQuestion, Project, StructuralRef,
};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{
    db_err, exam_scope_columns, id_i64, lesson_owner_columns, map_course_row, map_exam_row,
    map_lesson_row, map_module_row, map_practice_question_row, map_project_row, ser, to_json,
};
use crate::repository::{CourseRepository, StorageError};

async fn fetch_course(conn: &mut SqliteConnection, id: CourseId) -> Result<Course, StorageError> {
    let row = sqlx::query(
        "SELECT id, name, description, position, published FROM courses WHERE id = ?1",
    )
    .bind(id_i64("course_id", id.value())?)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::NotFound)?;
    map_course_row(&row)
}

/// Assemble a course tree using `conn`, so a caller can read it inside its
/// own transaction.
pub(super) async fn load_tree_on(
    conn: &mut SqliteConnection,
    id: CourseId,
) -> Result<CourseTree, StorageError> {
    let course = fetch_course(conn, id).await?;
    let course_id = id_i64("course_id", id.value())?;

    let module_rows = sqlx::query(
        r"
        SELECT id, course_id, position, title, required_level
        FROM modules WHERE course_id = ?1 ORDER BY position
        ",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let lesson_rows = sqlx::query(
        r"
        SELECT l.id, l.course_id, l.module_id, l.position, l.title, l.body
        FROM lessons l
        LEFT JOIN modules m ON m.id = l.module_id
        WHERE l.course_id = ?1 OR m.course_id = ?1
        ORDER BY l.position
        ",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let question_rows = sqlx::query(
        r"
        SELECT q.id, q.module_id, q.position, q.prompt, q.answer_type, q.points, q.options
        FROM practice_questions q
        JOIN modules m ON m.id = q.module_id
        WHERE m.course_id = ?1
        ORDER BY q.position
        ",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let exam_rows = sqlx::query(
        r"
        SELECT e.id, e.module_id, e.course_id, e.title, e.passing_score,
               e.time_limit_minutes, e.questions
        FROM exams e
        LEFT JOIN modules m ON m.id = e.module_id
        WHERE e.course_id = ?1 OR m.course_id = ?1
        ORDER BY e.id
        ",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let project_rows = sqlx::query(
        r"
        SELECT id, course_id, position, title, max_points
        FROM projects WHERE course_id = ?1 ORDER BY position
        ",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?;

    let mut lessons = lesson_rows
        .iter()
        .map(map_lesson_row)
        .collect::<Result<Vec<_>, _>>()?;
    let mut questions = question_rows
        .iter()
        .map(map_practice_question_row)
        .collect::<Result<Vec<_>, _>>()?;
    let mut exams = exam_rows
        .iter()
        .map(map_exam_row)
        .collect::<Result<Vec<_>, _>>()?;

    let mut modules = Vec::with_capacity(module_rows.len());
    for row in &module_rows {
        let module = map_module_row(row)?;
        let owner = LessonOwner::Module(module.id());
        let (own_lessons, rest): (Vec<_>, Vec<_>) =
            lessons.into_iter().partition(|l| l.owner() == owner);
        lessons = rest;
        let (own_questions, rest): (Vec<_>, Vec<_>) = questions
            .into_iter()
            .partition(|q| q.module_id() == module.id());
        questions = rest;
        let (own_exams, rest): (Vec<_>, Vec<_>) = exams
            .into_iter()
            .partition(|e| e.scope() == ExamScope::Module(module.id()));
        exams = rest;
        let tree =
            ModuleTree::new(module, own_lessons, own_questions, own_exams).map_err(ser)?;
        modules.push(tree);
    }

    // Whatever is left belongs to the course itself.
    let final_exam = exams.into_iter().next();
    let projects = project_rows
        .iter()
        .map(map_project_row)
        .collect::<Result<Vec<_>, _>>()?;

    CourseTree::new(course, modules, lessons, projects, final_exam).map_err(ser)
}


#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn insert_course(&self, course: &Course) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO courses (id, name, description, position, published)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("course_id", course.id().value())?)
        .bind(course.name())
        .bind(course.description())
        .bind(i64::from(course.position()))
        .bind(course.is_published())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_course_published(
        &self,
        id: CourseId,
        published: bool,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE courses SET published = ?1 WHERE id = ?2")
            .bind(published)
            .bind(id_i64("course_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Course, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_course(&mut conn, id).await
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, name, description, position, published FROM courses ORDER BY position, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_course_row).collect()
    }

    async fn insert_module(&self, module: &Module) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO modules (id, course_id, position, title, required_level)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("module_id", module.id().value())?)
        .bind(id_i64("course_id", module.course_id().value())?)
        .bind(i64::from(module.position()))
        .bind(module.title())
        .bind(module.required_level())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let (course_id, module_id) = lesson_owner_columns(lesson.owner())?;
        sqlx::query(
            r"
            INSERT INTO lessons (id, course_id, module_id, position, title, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("lesson_id", lesson.id().value())?)
        .bind(course_id)
        .bind(module_id)
        .bind(i64::from(lesson.position()))
        .bind(lesson.title())
        .bind(lesson.body())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_practice_question(
        &self,
        question: &PracticeQuestion,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO practice_questions (id, module_id, position, prompt, answer_type, points, options)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(id_i64("question_id", question.id().value())?)
        .bind(id_i64("module_id", question.module_id().value())?)
        .bind(i64::from(question.position()))
        .bind(question.prompt())
        .bind(question.answer_type().as_str())
        .bind(i64::from(question.points()))
        .bind(to_json(question.options())?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        let (module_id, course_id) = exam_scope_columns(exam.scope())?;
        sqlx::query(
            r"
            INSERT INTO exams (id, module_id, course_id, title, passing_score, time_limit_minutes, questions)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(id_i64("exam_id", exam.id().value())?)
        .bind(module_id)
        .bind(course_id)
        .bind(exam.title())
        .bind(i64::from(exam.passing_score()))
        .bind(i64::from(exam.time_limit_minutes()))
        .bind(to_json(exam.questions())?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO projects (id, course_id, position, title, max_points)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(id_i64("project_id", project.id().value())?)
        .bind(id_i64("course_id", project.course_id().value())?)
        .bind(i64::from(project.position()))
        .bind(project.title())
        .bind(i64::from(project.max_points()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_tree(&self, id: CourseId) -> Result<CourseTree, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        load_tree_on(&mut conn, id).await
    }

    async fn locate(&self, node: StructuralRef) -> Result<Option<CourseId>, StorageError> {
        let (sql, id) = match node {
            StructuralRef::Course(id) => ("SELECT id FROM courses WHERE id = ?1", id.value()),
            StructuralRef::Module(id) => ("SELECT course_id FROM modules WHERE id = ?1", id.value()),
            StructuralRef::Lesson(id) => (
                r"
                SELECT COALESCE(l.course_id, m.course_id)
                FROM lessons l LEFT JOIN modules m ON m.id = l.module_id
                WHERE l.id = ?1
                ",
                id.value(),
            ),
            StructuralRef::PracticeQuestion(id) => (
                r"
                SELECT m.course_id
                FROM practice_questions q JOIN modules m ON m.id = q.module_id
                WHERE q.id = ?1
                ",
                id.value(),
            ),
            StructuralRef::Exam(id) => (
                r"
                SELECT COALESCE(e.course_id, m.course_id)
                FROM exams e LEFT JOIN modules m ON m.id = e.module_id
                WHERE e.id = ?1
                ",
                id.value(),
            ),
            StructuralRef::Project(id) => {
                ("SELECT course_id FROM projects WHERE id = ?1", id.value())
            }
            StructuralRef::Submission(_) => return Ok(None),
        };

        let course: Option<i64> = sqlx::query_scalar(sql)
            .bind(id_i64("id", id)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        course
            .map(|v| {
                u64::try_from(v)
                    .map(CourseId::new)
                    .map_err(|_| StorageError::Serialization("course_id sign overflow".into()))
            })
            .transpose()
    }
}
