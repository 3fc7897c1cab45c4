#![forbid(unsafe_code)]

pub mod admin_report_service;
pub mod admin_tools_service;
pub mod app_services;
pub mod course_progress_service;
pub mod enrolment_service;
pub mod error;
pub mod learner_activity_service;
pub mod lesson_date_service;
pub mod note_service;
pub mod report_export_service;
pub mod training_plan_service;
pub mod work_placement_service;

pub use lms_core::Clock;

pub use admin_report_service::{AdminReportService, ReportSync};
pub use admin_tools_service::{
    AdminToolsService, ConsistencyReport, PARITY_TOLERANCE, ProfileSyncReport, ProfileSyncResult,
    PurgeReport,
};
pub use app_services::AppServices;
pub use course_progress_service::{CourseProgressService, Recalculated};
pub use enrolment_service::{EnrolmentService, NewStudent};
pub use error::{
    ActivityServiceError, AdminToolError, AppServicesError, EnrolmentServiceError, ExportError,
    LessonDateError, NoteServiceError, ProgressServiceError, ReportSyncError, TrainingPlanError,
    WorkPlacementServiceError,
};
pub use learner_activity_service::LearnerActivityService;
pub use lesson_date_service::{BulkReport, CompetencyMismatch, ItemFailure, LessonDateService};
pub use note_service::NoteService;
pub use report_export_service::{ExportTotals, ReportColumn, ReportExportService};
pub use training_plan_service::TrainingPlanService;
pub use work_placement_service::{NewPlacement, WorkPlacementService};
