use mastermore_core::model::{GradingFields, SubmissionId};
use mastermore_core::progression::{Settlement, settle};
use sqlx::{Sqlite, Transaction};

use super::SqliteRepository;
use super::course_repo::load_tree_on;
use super::learner_repo::{fetch_enrollment, load_records_on};
use super::mapping::{db_err, id_i64, opt_id_i64, to_json};
use crate::repository::{
    CommitReceipt, ProgressChanges, ProgressPersistence, SettleScope, StorageError,
};

fn submission_id(rowid: i64) -> Result<SubmissionId, StorageError> {
    u64::try_from(rowid)
        .map(SubmissionId::new)
        .map_err(|_| StorageError::Serialization("submission id sign overflow".into()))
}

fn score_i64(grading: &GradingFields) -> Option<i64> {
    grading.score.map(i64::from)
}

async fn write_learner_rows(
    tx: &mut Transaction<'_, Sqlite>,
    changes: &ProgressChanges,
) -> Result<(), StorageError> {
    if let Some(e) = &changes.enrollment {
        sqlx::query(
            r"
            INSERT INTO enrollments (user_id, course_id, enrolled_at, completed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, course_id) DO NOTHING
            ",
        )
        .bind(id_i64("user_id", e.user_id.value())?)
        .bind(id_i64("course_id", e.course_id.value())?)
        .bind(e.enrolled_at)
        .bind(e.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    for c in &changes.lesson_completions {
        sqlx::query(
            r"
            INSERT INTO lesson_completions (user_id, lesson_id, completed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                completed_at = excluded.completed_at
            ",
        )
        .bind(id_i64("user_id", c.user_id.value())?)
        .bind(id_i64("lesson_id", c.lesson_id.value())?)
        .bind(c.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    for p in &changes.practice_submissions {
        sqlx::query(
            r"
            INSERT INTO practice_submissions (
                user_id, question_id, answer, correctness, points_awarded, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("user_id", p.user_id.value())?)
        .bind(id_i64("question_id", p.question_id.value())?)
        .bind(to_json(&p.answer)?)
        .bind(p.correctness.as_str())
        .bind(i64::from(p.points_awarded))
        .bind(p.submitted_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    Ok(())
}

async fn write_submissions(
    tx: &mut Transaction<'_, Sqlite>,
    changes: &ProgressChanges,
) -> Result<CommitReceipt, StorageError> {
    let mut receipt = CommitReceipt::default();

    if let Some(s) = &changes.exam_submission {
        let res = sqlx::query(
            r"
            INSERT INTO exam_submissions (
                user_id, exam_id, answers, item_scores, max_score,
                score, passed, grader_id, graded_at, feedback, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
        )
        .bind(id_i64("user_id", s.user_id.value())?)
        .bind(id_i64("exam_id", s.exam_id.value())?)
        .bind(to_json(&s.answers)?)
        .bind(to_json(&s.item_scores)?)
        .bind(i64::from(s.max_score))
        .bind(score_i64(&s.grading))
        .bind(s.grading.passed)
        .bind(opt_id_i64("grader_id", s.grading.grader_id.map(|g| g.value()))?)
        .bind(s.grading.graded_at)
        .bind(s.grading.feedback.as_deref())
        .bind(s.submitted_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        receipt.exam_submission_id = Some(submission_id(res.last_insert_rowid())?);
    }

    if let Some(s) = &changes.project_submission {
        let res = sqlx::query(
            r"
            INSERT INTO project_submissions (
                user_id, project_id, content, max_score,
                score, passed, grader_id, graded_at, feedback, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(id_i64("user_id", s.user_id.value())?)
        .bind(id_i64("project_id", s.project_id.value())?)
        .bind(s.content.as_str())
        .bind(i64::from(s.max_score))
        .bind(score_i64(&s.grading))
        .bind(s.grading.passed)
        .bind(opt_id_i64("grader_id", s.grading.grader_id.map(|g| g.value()))?)
        .bind(s.grading.graded_at)
        .bind(s.grading.feedback.as_deref())
        .bind(s.submitted_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        receipt.project_submission_id = Some(submission_id(res.last_insert_rowid())?);
    }

    if let Some(g) = &changes.exam_grading {
        let res = sqlx::query(
            r"
            UPDATE exam_submissions SET
                item_scores = ?2, score = ?3, passed = ?4,
                grader_id = ?5, graded_at = ?6, feedback = ?7
            WHERE id = ?1
            ",
        )
        .bind(id_i64("submission_id", g.submission_id.value())?)
        .bind(to_json(&g.item_scores)?)
        .bind(score_i64(&g.grading))
        .bind(g.grading.passed)
        .bind(opt_id_i64("grader_id", g.grading.grader_id.map(|u| u.value()))?)
        .bind(g.grading.graded_at)
        .bind(g.grading.feedback.as_deref())
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
    }

    if let Some(g) = &changes.project_grading {
        let res = sqlx::query(
            r"
            UPDATE project_submissions SET
                score = ?2, passed = ?3, grader_id = ?4, graded_at = ?5, feedback = ?6
            WHERE id = ?1
            ",
        )
        .bind(id_i64("submission_id", g.submission_id.value())?)
        .bind(score_i64(&g.grading))
        .bind(g.grading.passed)
        .bind(opt_id_i64("grader_id", g.grading.grader_id.map(|u| u.value()))?)
        .bind(g.grading.graded_at)
        .bind(g.grading.feedback.as_deref())
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
    }

    for grade in &changes.grade_records {
        sqlx::query(
            r"
            INSERT INTO grades (
                user_id, item_kind, item_id, score, max_score, percentage,
                passed, grader_id, feedback, recorded_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(id_i64("user_id", grade.user_id.value())?)
        .bind(grade.item_kind.as_str())
        .bind(id_i64("item_id", grade.item_id)?)
        .bind(i64::from(grade.score))
        .bind(i64::from(grade.max_score))
        .bind(i64::from(grade.percentage))
        .bind(grade.passed)
        .bind(opt_id_i64("grader_id", grade.grader_id.map(|u| u.value()))?)
        .bind(grade.feedback.as_deref())
        .bind(grade.recorded_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    Ok(receipt)
}

/// Recompute derived course state from the rows visible to `tx`, after the
/// event's own writes, and store it.
async fn write_settlement(
    tx: &mut Transaction<'_, Sqlite>,
    scope: SettleScope,
) -> Result<Settlement, StorageError> {
    let SettleScope {
        user_id,
        course_id,
        at,
    } = scope;
    let tree = load_tree_on(&mut **tx, course_id).await?;
    let mut records = load_records_on(&mut **tx, user_id, course_id).await?;
    let open = fetch_enrollment(&mut **tx, user_id, course_id)
        .await?
        .is_some_and(|e| !e.is_completed());
    let settlement = settle(&tree, &mut records, open);

    let user = id_i64("user_id", user_id.value())?;
    let course = id_i64("course_id", course_id.value())?;
    for module_id in &settlement.completed_modules {
        sqlx::query(
            r"
            INSERT INTO module_completions (user_id, module_id, completed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, module_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(id_i64("module_id", module_id.value())?)
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    sqlx::query(
        r"
        INSERT INTO user_progress (user_id, course_id, percentage, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(user_id, course_id) DO UPDATE SET
            percentage = excluded.percentage,
            updated_at = excluded.updated_at
        ",
    )
    .bind(user)
    .bind(course)
    .bind(i64::from(settlement.percentage))
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;

    if settlement.course_completed {
        sqlx::query(
            r"
            UPDATE enrollments SET completed_at = ?3
            WHERE user_id = ?1 AND course_id = ?2 AND completed_at IS NULL
            ",
        )
        .bind(user)
        .bind(course)
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }

    Ok(settlement)
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn commit(&self, changes: &ProgressChanges) -> Result<CommitReceipt, StorageError> {
        // IMMEDIATE takes the write lock up front, so commits for the same
        // learner settle one after another.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        // Dropping `tx` on an early return rolls everything back.
        write_learner_rows(&mut tx, changes).await?;
        let mut receipt = write_submissions(&mut tx, changes).await?;
        if let Some(scope) = changes.settle {
            receipt.settlement = Some(write_settlement(&mut tx, scope).await?);
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::debug!(
            lessons = changes.lesson_completions.len(),
            practice = changes.practice_submissions.len(),
            grades = changes.grade_records.len(),
            "committed progress changes"
        );
        Ok(receipt)
    }
}
