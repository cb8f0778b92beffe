#![forbid(unsafe_code)]

pub mod app_services;
pub mod completion_recorder;
pub mod course_admin;
pub mod error;
pub mod grading_service;
pub mod progress_view;

pub use mastermore_core::Clock;

pub use app_services::AppServices;
pub use completion_recorder::{CompletionRecorder, ExamAttempt, ExamGradeOutcome, PracticeResult};
pub use course_admin::CourseAdminService;
pub use error::{AppServicesError, CourseAdminError, LockReason, ProgressionError};
pub use grading_service::{GradeTarget, GradingService};
pub use progress_view::ProgressViewService;
