use std::sync::Arc;

use chrono::FixedOffset;
use lms_core::training_plan::TrainingPlanSettings;
use storage::repository::Storage;

use crate::Clock;
use crate::admin_report_service::AdminReportService;
use crate::admin_tools_service::AdminToolsService;
use crate::course_progress_service::CourseProgressService;
use crate::enrolment_service::EnrolmentService;
use crate::error::AppServicesError;
use crate::learner_activity_service::LearnerActivityService;
use crate::lesson_date_service::LessonDateService;
use crate::note_service::NoteService;
use crate::report_export_service::ReportExportService;
use crate::training_plan_service::TrainingPlanService;
use crate::work_placement_service::WorkPlacementService;

/// Assembles the back-office services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<CourseProgressService>,
    training_plans: Arc<TrainingPlanService>,
    reports: Arc<AdminReportService>,
    lesson_dates: Arc<LessonDateService>,
    enrolments: Arc<EnrolmentService>,
    activities: Arc<LearnerActivityService>,
    notes: Arc<NoteService>,
    placements: Arc<WorkPlacementService>,
    admin_tools: Arc<AdminToolsService>,
    export: Arc<ReportExportService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: TrainingPlanSettings,
        tz: FixedOffset,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, settings, tz))
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        settings: TrainingPlanSettings,
        tz: FixedOffset,
    ) -> Self {
        let reports = Arc::new(AdminReportService::new(
            Arc::clone(&storage.users),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrolments),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.reports),
        ));
        let progress = Arc::new(CourseProgressService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.attempts),
            Arc::clone(&reports),
        ));
        let training_plans = Arc::new(TrainingPlanService::new(
            clock,
            settings,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrolments),
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.progress),
        ));
        let lesson_dates = Arc::new(LessonDateService::new(
            clock,
            tz,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrolments),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.activity),
            Arc::clone(&storage.competencies),
        ));
        let enrolments = Arc::new(EnrolmentService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.users),
            Arc::clone(&storage.enrolments),
            Arc::clone(&reports),
        ));
        let activities = Arc::new(LearnerActivityService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.enrolments),
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.activity),
            Arc::clone(&progress),
            Arc::clone(&lesson_dates),
        ));
        let notes = Arc::new(NoteService::new(clock, Arc::clone(&storage.notes)));
        let placements = Arc::new(WorkPlacementService::new(
            clock,
            Arc::clone(&storage.placements),
        ));
        let admin_tools = Arc::new(AdminToolsService::new(
            Arc::clone(&storage.users),
            Arc::clone(&storage.enrolments),
            Arc::clone(&storage.student_data),
            Arc::clone(&progress),
            Arc::clone(&training_plans),
            Arc::clone(&reports),
            Arc::clone(&lesson_dates),
        ));
        let export = Arc::new(ReportExportService::new(Arc::clone(&storage.reports)));

        Self {
            progress,
            training_plans,
            reports,
            lesson_dates,
            enrolments,
            activities,
            notes,
            placements,
            admin_tools,
            export,
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<CourseProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn training_plans(&self) -> Arc<TrainingPlanService> {
        Arc::clone(&self.training_plans)
    }

    #[must_use]
    pub fn reports(&self) -> Arc<AdminReportService> {
        Arc::clone(&self.reports)
    }

    #[must_use]
    pub fn lesson_dates(&self) -> Arc<LessonDateService> {
        Arc::clone(&self.lesson_dates)
    }

    #[must_use]
    pub fn enrolments(&self) -> Arc<EnrolmentService> {
        Arc::clone(&self.enrolments)
    }

    #[must_use]
    pub fn activities(&self) -> Arc<LearnerActivityService> {
        Arc::clone(&self.activities)
    }

    #[must_use]
    pub fn notes(&self) -> Arc<NoteService> {
        Arc::clone(&self.notes)
    }

    #[must_use]
    pub fn placements(&self) -> Arc<WorkPlacementService> {
        Arc::clone(&self.placements)
    }

    #[must_use]
    pub fn admin_tools(&self) -> Arc<AdminToolsService> {
        Arc::clone(&self.admin_tools)
    }

    #[must_use]
    pub fn export(&self) -> Arc<ReportExportService> {
        Arc::clone(&self.export)
    }
}
