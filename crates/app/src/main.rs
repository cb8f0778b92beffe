use clap::{Parser, Subcommand};
use mastermore_core::access::Actor;
use mastermore_core::model::{CourseId, UserId};
use services::{AppServices, Clock};
use storage::repository::{PendingKind, PendingSubmission};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod seed;

use config::{AppConfig, prepare_sqlite_file};

#[derive(Parser, Debug)]
#[command(name = "mastermore", version, about = "MasterMore course progression tools")]
struct Cli {
    /// `SQLite` URL or path; overrides `MASTERMORE_DB_URL`.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema.
    Migrate,
    /// Load the demo course.
    Seed {
        #[arg(long, default_value_t = 1)]
        admin: u64,
    },
    /// Print a learner's course outline as JSON.
    Outline {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        course: u64,
    },
    /// List ungraded submissions, oldest first.
    Pending {
        #[arg(long, default_value = "project", value_parser = parse_kind)]
        kind: PendingKind,
        #[arg(long, default_value_t = 1)]
        grader: u64,
    },
    /// Print a learner's grade history.
    Grades {
        #[arg(long)]
        user: u64,
    },
}

fn parse_kind(raw: &str) -> Result<PendingKind, String> {
    PendingKind::parse(raw)
        .ok_or_else(|| format!("expected project, module_exam or final_exam, got {raw}"))
}

fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn describe(pending: &PendingSubmission) -> String {
    let id = pending
        .id()
        .map_or_else(|| "-".to_owned(), |id| id.to_string());
    let item = match pending {
        PendingSubmission::Exam(s) => format!("exam {}", s.exam_id),
        PendingSubmission::Project(s) => format!("project {}", s.project_id),
    };
    format!(
        "#{id}\tuser {}\t{item}\t{}",
        pending.user_id(),
        pending.submitted_at().to_rfc3339()
    )
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().with_db_override(cli.db)?;
    init_logging(&config.log_filter);

    prepare_sqlite_file(&config.db_url)?;
    let app = AppServices::new_sqlite(&config.db_url, Clock::System).await?;

    match cli.command {
        Command::Migrate => {
            info!(url = %config.db_url, "database ready");
        }
        Command::Seed { admin } => {
            let outcome = seed::seed_demo_course(&app, &Actor::admin(UserId::new(admin))).await?;
            match outcome {
                seed::SeedOutcome::Created => println!("seeded course {}", seed::DEMO_COURSE),
                seed::SeedOutcome::Resumed => {
                    println!("completed interrupted seed of course {}", seed::DEMO_COURSE);
                }
                seed::SeedOutcome::AlreadyPresent => {
                    println!("course {} already exists", seed::DEMO_COURSE);
                }
            }
        }
        Command::Outline { user, course } => {
            let outline = app
                .progress_view()
                .course_outline(UserId::new(user), CourseId::new(course))
                .await?;
            println!("{}", serde_json::to_string_pretty(&outline)?);
        }
        Command::Pending { kind, grader } => {
            let pending = app
                .grading()
                .list_pending_grading(&Actor::admin(UserId::new(grader)), kind)
                .await?;
            if pending.is_empty() {
                println!("no pending {} submissions", kind.as_str());
            }
            for submission in &pending {
                println!("{}", describe(submission));
            }
        }
        Command::Grades { user } => {
            for grade in app.progress_view().grade_history(UserId::new(user)).await? {
                println!(
                    "{}\t{} {}\t{}/{} ({}%)\t{}",
                    grade.recorded_at.to_rfc3339(),
                    grade.item_kind.as_str(),
                    grade.item_id,
                    grade.score,
                    grade.max_score,
                    grade.percentage,
                    if grade.passed { "passed" } else { "failed" },
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
