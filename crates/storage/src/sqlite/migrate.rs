use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Version 1 schema, one statement per entry.
///
/// Every (user, item) learner table carries a uniqueness constraint; the
/// single-attempt and upsert rules rely on them.
const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            position INTEGER NOT NULL CHECK (position >= 0),
            published INTEGER NOT NULL DEFAULT 0 CHECK (published IN (0, 1))
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS modules (
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            required_level TEXT,
            UNIQUE (course_id, position),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lessons (
            id INTEGER PRIMARY KEY,
            course_id INTEGER,
            module_id INTEGER,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            CHECK ((course_id IS NULL) <> (module_id IS NULL)),
            UNIQUE (course_id, position),
            UNIQUE (module_id, position),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (module_id) REFERENCES modules(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS practice_questions (
            id INTEGER PRIMARY KEY,
            module_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            prompt TEXT NOT NULL,
            answer_type TEXT NOT NULL,
            points INTEGER NOT NULL CHECK (points >= 0),
            options TEXT NOT NULL,
            UNIQUE (module_id, position),
            FOREIGN KEY (module_id) REFERENCES modules(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS exams (
            id INTEGER PRIMARY KEY,
            module_id INTEGER,
            course_id INTEGER,
            title TEXT NOT NULL,
            passing_score INTEGER NOT NULL CHECK (passing_score BETWEEN 0 AND 100),
            time_limit_minutes INTEGER NOT NULL CHECK (time_limit_minutes > 0),
            questions TEXT NOT NULL,
            CHECK ((course_id IS NULL) <> (module_id IS NULL)),
            UNIQUE (course_id),
            FOREIGN KEY (module_id) REFERENCES modules(id) ON DELETE CASCADE,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            max_points INTEGER NOT NULL CHECK (max_points > 0),
            UNIQUE (course_id, position),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS enrollments (
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            enrolled_at TEXT NOT NULL,
            completed_at TEXT,
            PRIMARY KEY (user_id, course_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lesson_completions (
            user_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (user_id, lesson_id),
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS practice_submissions (
            user_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            answer TEXT NOT NULL,
            correctness TEXT NOT NULL,
            points_awarded INTEGER NOT NULL CHECK (points_awarded >= 0),
            submitted_at TEXT NOT NULL,
            PRIMARY KEY (user_id, question_id),
            FOREIGN KEY (question_id) REFERENCES practice_questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS exam_submissions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            exam_id INTEGER NOT NULL,
            answers TEXT NOT NULL,
            item_scores TEXT NOT NULL,
            max_score INTEGER NOT NULL CHECK (max_score >= 0),
            score INTEGER,
            passed INTEGER,
            grader_id INTEGER,
            graded_at TEXT,
            feedback TEXT,
            submitted_at TEXT NOT NULL,
            UNIQUE (user_id, exam_id),
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS project_submissions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            project_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            max_score INTEGER NOT NULL CHECK (max_score > 0),
            score INTEGER,
            passed INTEGER,
            grader_id INTEGER,
            graded_at TEXT,
            feedback TEXT,
            submitted_at TEXT NOT NULL,
            UNIQUE (user_id, project_id),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS module_completions (
            user_id INTEGER NOT NULL,
            module_id INTEGER NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (user_id, module_id),
            FOREIGN KEY (module_id) REFERENCES modules(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS user_progress (
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, course_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS grades (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            item_kind TEXT NOT NULL,
            item_id INTEGER NOT NULL,
            score INTEGER NOT NULL CHECK (score >= 0),
            max_score INTEGER NOT NULL CHECK (max_score >= 0),
            percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
            passed INTEGER NOT NULL CHECK (passed IN (0, 1)),
            grader_id INTEGER,
            feedback TEXT,
            recorded_at TEXT NOT NULL
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_exam_submissions_pending
            ON exam_submissions (passed, submitted_at, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_project_submissions_pending
            ON project_submissions (passed, submitted_at, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_grades_user_recorded
            ON grades (user_id, recorded_at);
    ",
];

/// Runs the schema migrations that have not been applied yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
