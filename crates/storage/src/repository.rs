use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::model::{
    ActivityEvent, AdminReport, AttemptId, Company, CompanyId, Competency, Course, CourseId,
    CourseProgress, EnrolmentId, EnrolmentPlan, LessonId, NewEnrolment, Note, NoteId, NoteSubject,
    Percentage, ProgressDetails, QuizAttempt, QuizId, Role, StudentAssignment, StudentCourseEnrolment,
    User, UserId, WorkPlacement, WorkPlacementId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// User awaiting an id from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserRecord {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub company_id: Option<CompanyId>,
    pub is_active: bool,
}

impl NewUserRecord {
    #[must_use]
    pub fn from_user(user: &User) -> Self {
        Self {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.role,
            company_id: user.company_id,
            is_active: user.is_active,
        }
    }

    #[must_use]
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            role: self.role,
            company_id: self.company_id,
            is_active: self.is_active,
        }
    }
}

/// Everything written by one signup-link registration, committed atomically.
#[derive(Debug, Clone)]
pub struct SignupRecord {
    pub student: NewUserRecord,
    pub leader_id: Option<UserId>,
    pub plan: EnrolmentPlan,
    pub is_chargeable: bool,
    /// Zeroed details per planned course.
    pub initial_progress: Vec<(CourseId, ProgressDetails)>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupOutcome {
    pub student_id: UserId,
    pub enrolments: Vec<StudentCourseEnrolment>,
}

/// Admin assignment of an existing user: the enrolment plus the zeroed
/// progress tree stored with it when the pair has no progress row yet.
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub enrolment: NewEnrolment,
    pub initial_progress: ProgressDetails,
}

/// Fresh quiz attempt awaiting an id from storage. Stored in `Attempting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAttemptRecord {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub quiz_id: QuizId,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

/// Note awaiting an id from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNoteRecord {
    pub subject: NoteSubject,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl NewNoteRecord {
    #[must_use]
    pub fn from_note(note: &Note) -> Self {
        Self {
            subject: note.subject,
            author_id: note.author_id,
            body: note.body.clone(),
            created_at: note.created_at,
        }
    }
}

/// Rows removed by a student purge, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PurgeSummary {
    pub users: u64,
    pub enrolments: u64,
    pub progress: u64,
    pub attempts: u64,
    pub activities: u64,
    pub competencies: u64,
    pub reports: u64,
    pub notes: u64,
    pub placements: u64,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Persist or replace a course including its lesson tree.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;

    /// Fetch a course by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;
}

/// Users, companies and trainer/leader assignments.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user and return its new id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the email is already taken.
    async fn insert_new_user(&self, user: NewUserRecord) -> Result<UserId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the user cannot be stored.
    async fn upsert_user(&self, user: &User) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// Fetch the users that exist among `ids`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the company cannot be stored.
    async fn upsert_company(&self, company: &Company) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>, StorageError>;

    /// Replace the trainers and leaders assigned to a student.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assignment cannot be stored.
    async fn set_assignment(&self, assignment: &StudentAssignment) -> Result<(), StorageError>;

    /// A student without assignments yields an empty assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_assignment(&self, student_id: UserId) -> Result<StudentAssignment, StorageError>;
}

#[async_trait]
pub trait EnrolmentRepository: Send + Sync {
    /// Insert an enrolment; one per (user, course).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the user is already enrolled in the course.
    async fn insert_enrolment(
        &self,
        enrolment: NewEnrolment,
    ) -> Result<StudentCourseEnrolment, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the enrolment does not exist.
    async fn update_enrolment(&self, enrolment: &StudentCourseEnrolment) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrolment>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_enrolments_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError>;

    /// One page of all enrolments ordered by id, for chunked bulk jobs.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_enrolments_page(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError>;

    /// Create the student, their leader assignment, the planned enrolments and
    /// zeroed progress rows in one unit. Nothing is written if any step fails.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` for a duplicate email or enrolment.
    async fn commit_signup(&self, signup: SignupRecord) -> Result<SignupOutcome, StorageError>;

    /// Insert the enrolment and, when missing, its zeroed progress row in one
    /// unit. An existing progress row is kept as is.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the user is already enrolled in the course.
    async fn commit_assignment(
        &self,
        assignment: AssignmentRecord,
    ) -> Result<StudentCourseEnrolment, StorageError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_progress(&self, progress: &CourseProgress) -> Result<(), StorageError>;
}

#[async_trait]
pub trait QuizAttemptRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn insert_new_attempt(&self, attempt: NewAttemptRecord) -> Result<AttemptId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_attempt(&self, id: AttemptId) -> Result<Option<QuizAttempt>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be stored.
    async fn upsert_attempt(&self, attempt: &QuizAttempt) -> Result<(), StorageError>;

    /// Attempts of one student in one course, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_attempts(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<QuizAttempt>, StorageError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the event cannot be stored.
    async fn append_activity(&self, event: &ActivityEvent) -> Result<(), StorageError>;

    /// Activity of one student in one course, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_activity(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ActivityEvent>, StorageError>;
}

#[async_trait]
pub trait CompetencyRepository: Send + Sync {
    /// Keyed by (user, course, lesson).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_competency(&self, competency: &Competency) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_competencies(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<Competency>, StorageError>;
}

#[async_trait]
pub trait AdminReportRepository: Send + Sync {
    /// Last write wins.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_report(&self, report: &AdminReport) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_report(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<AdminReport>, StorageError>;

    /// Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn delete_report(&self, user_id: UserId, course_id: CourseId) -> Result<bool, StorageError>;

    /// One page of reports ordered by (student, course).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_reports_page(&self, offset: u64, limit: u32) -> Result<Vec<AdminReport>, StorageError>;
}

#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the note cannot be stored.
    async fn insert_new_note(&self, note: NewNoteRecord) -> Result<NoteId, StorageError>;

    /// Persist pin state and log of an existing note.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the note does not exist.
    async fn update_note(&self, note: &Note) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_note(&self, id: NoteId) -> Result<Option<Note>, StorageError>;

    /// Notes of a subject, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_notes(&self, subject: NoteSubject) -> Result<Vec<Note>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn count_pinned(&self, subject: NoteSubject) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait WorkPlacementRepository: Send + Sync {
    /// Insert a placement, ignoring `placement.id`, and return the stored id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the placement cannot be stored.
    async fn insert_new_placement(
        &self,
        placement: &WorkPlacement,
    ) -> Result<WorkPlacementId, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the placement does not exist.
    async fn update_placement(&self, placement: &WorkPlacement) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn get_placement(&self, id: WorkPlacementId) -> Result<Option<WorkPlacement>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on repository failures.
    async fn list_placements(&self, user_id: UserId) -> Result<Vec<WorkPlacement>, StorageError>;
}

#[async_trait]
pub trait StudentDataRepository: Send + Sync {
    /// Delete the student and every row they own in a single unit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist. Nothing is
    /// deleted when any step fails.
    async fn purge_student(&self, user_id: UserId) -> Result<PurgeSummary, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct State {
    courses: HashMap<CourseId, Course>,
    users: BTreeMap<UserId, User>,
    companies: HashMap<CompanyId, Company>,
    assignments: HashMap<UserId, StudentAssignment>,
    enrolments: BTreeMap<EnrolmentId, StudentCourseEnrolment>,
    progress: HashMap<(UserId, CourseId), CourseProgress>,
    attempts: BTreeMap<AttemptId, QuizAttempt>,
    activity: Vec<ActivityEvent>,
    competencies: BTreeMap<(UserId, CourseId, LessonId), Competency>,
    reports: BTreeMap<(UserId, CourseId), AdminReport>,
    notes: BTreeMap<NoteId, Note>,
    placements: BTreeMap<WorkPlacementId, WorkPlacement>,
    last_user_id: u64,
    last_enrolment_id: u64,
    last_attempt_id: u64,
    last_note_id: u64,
    last_placement_id: u64,
}

impl State {
    fn insert_user(&mut self, record: NewUserRecord) -> Result<UserId, StorageError> {
        let email = record.email.trim().to_lowercase();
        if self
            .users
            .values()
            .any(|u| u.email.trim().to_lowercase() == email)
        {
            return Err(StorageError::Conflict);
        }
        let highest = self.users.keys().next_back().map_or(0, UserId::value);
        self.last_user_id = self.last_user_id.max(highest);
        self.last_user_id += 1;
        let id = UserId::new(self.last_user_id);
        self.users.insert(id, record.into_user(id));
        Ok(id)
    }

    fn insert_enrolment(
        &mut self,
        enrolment: NewEnrolment,
    ) -> Result<StudentCourseEnrolment, StorageError> {
        if self
            .enrolments
            .values()
            .any(|e| e.user_id == enrolment.user_id && e.course_id == enrolment.course_id)
        {
            return Err(StorageError::Conflict);
        }
        self.last_enrolment_id += 1;
        let stored = enrolment.assign_id(EnrolmentId::new(self.last_enrolment_id));
        self.enrolments.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All tables live behind one lock, so multi-table writes are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        self.lock()?.courses.insert(course.id(), course.clone());
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn insert_new_user(&self, user: NewUserRecord) -> Result<UserId, StorageError> {
        self.lock()?.insert_user(user)
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.lock()?.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .users
            .values()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn upsert_company(&self, company: &Company) -> Result<(), StorageError> {
        self.lock()?.companies.insert(company.id, company.clone());
        Ok(())
    }

    async fn get_company(&self, id: CompanyId) -> Result<Option<Company>, StorageError> {
        Ok(self.lock()?.companies.get(&id).cloned())
    }

    async fn set_assignment(&self, assignment: &StudentAssignment) -> Result<(), StorageError> {
        self.lock()?
            .assignments
            .insert(assignment.student_id, assignment.clone());
        Ok(())
    }

    async fn get_assignment(&self, student_id: UserId) -> Result<StudentAssignment, StorageError> {
        Ok(self
            .lock()?
            .assignments
            .get(&student_id)
            .cloned()
            .unwrap_or_else(|| StudentAssignment::empty(student_id)))
    }
}

#[async_trait]
impl EnrolmentRepository for InMemoryRepository {
    async fn insert_enrolment(
        &self,
        enrolment: NewEnrolment,
    ) -> Result<StudentCourseEnrolment, StorageError> {
        self.lock()?.insert_enrolment(enrolment)
    }

    async fn update_enrolment(&self, enrolment: &StudentCourseEnrolment) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .enrolments
            .get_mut(&enrolment.id)
            .ok_or(StorageError::NotFound)?;
        *slot = enrolment.clone();
        Ok(())
    }

    async fn get_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<StudentCourseEnrolment>, StorageError> {
        Ok(self
            .lock()?
            .enrolments
            .values()
            .find(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned())
    }

    async fn list_enrolments_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError> {
        Ok(self
            .lock()?
            .enrolments
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_enrolments_page(
        &self,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StudentCourseEnrolment>, StorageError> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(self
            .lock()?
            .enrolments
            .values()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn commit_signup(&self, signup: SignupRecord) -> Result<SignupOutcome, StorageError> {
        let mut guard = self.lock()?;
        let snapshot = (
            guard.users.clone(),
            guard.assignments.clone(),
            guard.enrolments.clone(),
            guard.progress.clone(),
            guard.last_user_id,
            guard.last_enrolment_id,
        );

        let result = apply_signup(&mut guard, signup);
        if result.is_err() {
            let (users, assignments, enrolments, progress, last_user, last_enrolment) = snapshot;
            guard.users = users;
            guard.assignments = assignments;
            guard.enrolments = enrolments;
            guard.progress = progress;
            guard.last_user_id = last_user;
            guard.last_enrolment_id = last_enrolment;
        }
        result
    }

    async fn commit_assignment(
        &self,
        assignment: AssignmentRecord,
    ) -> Result<StudentCourseEnrolment, StorageError> {
        assignment
            .enrolment
            .validate()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut guard = self.lock()?;
        let stored = guard.insert_enrolment(assignment.enrolment)?;
        guard
            .progress
            .entry((stored.user_id, stored.course_id))
            .or_insert_with(|| CourseProgress {
                user_id: stored.user_id,
                course_id: stored.course_id,
                details: assignment.initial_progress,
                percentage: Percentage::ZERO,
                updated_at: stored.updated_at,
            });
        Ok(stored)
    }
}

fn apply_signup(state: &mut State, signup: SignupRecord) -> Result<SignupOutcome, StorageError> {
    let student_id = state.insert_user(signup.student)?;
    let mut assignment = StudentAssignment::empty(student_id);
    assignment.leader_ids.extend(signup.leader_id);
    state.assignments.insert(student_id, assignment);

    let mut enrolments = Vec::new();
    for new in signup
        .plan
        .into_new_enrolments(student_id, signup.is_chargeable, signup.created_at)
    {
        new.validate()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        enrolments.push(state.insert_enrolment(new)?);
    }

    for (course_id, details) in signup.initial_progress {
        state.progress.insert(
            (student_id, course_id),
            CourseProgress {
                user_id: student_id,
                course_id,
                details,
                percentage: Percentage::ZERO,
                updated_at: signup.created_at,
            },
        );
    }

    Ok(SignupOutcome {
        student_id,
        enrolments,
    })
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<CourseProgress>, StorageError> {
        Ok(self.lock()?.progress.get(&(user_id, course_id)).cloned())
    }

    async fn upsert_progress(&self, progress: &CourseProgress) -> Result<(), StorageError> {
        self.lock()?
            .progress
            .insert((progress.user_id, progress.course_id), progress.clone());
        Ok(())
    }
}

#[async_trait]
impl QuizAttemptRepository for InMemoryRepository {
    async fn insert_new_attempt(&self, attempt: NewAttemptRecord) -> Result<AttemptId, StorageError> {
        let mut guard = self.lock()?;
        let highest = guard.attempts.keys().next_back().map_or(0, AttemptId::value);
        guard.last_attempt_id = guard.last_attempt_id.max(highest) + 1;
        let id = AttemptId::new(guard.last_attempt_id);
        let stored = QuizAttempt::start(
            id,
            attempt.user_id,
            attempt.course_id,
            attempt.quiz_id,
            attempt.attempt,
            attempt.created_at,
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.attempts.insert(id, stored);
        Ok(id)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Option<QuizAttempt>, StorageError> {
        Ok(self.lock()?.attempts.get(&id).cloned())
    }

    async fn upsert_attempt(&self, attempt: &QuizAttempt) -> Result<(), StorageError> {
        self.lock()?.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn list_attempts(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<QuizAttempt>, StorageError> {
        Ok(self
            .lock()?
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.course_id == course_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityRepository for InMemoryRepository {
    async fn append_activity(&self, event: &ActivityEvent) -> Result<(), StorageError> {
        self.lock()?.activity.push(event.clone());
        Ok(())
    }

    async fn list_activity(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ActivityEvent>, StorageError> {
        let mut events: Vec<ActivityEvent> = self
            .lock()?
            .activity
            .iter()
            .filter(|e| e.user_id == user_id && e.course_id == course_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }
}

#[async_trait]
impl CompetencyRepository for InMemoryRepository {
    async fn upsert_competency(&self, competency: &Competency) -> Result<(), StorageError> {
        self.lock()?.competencies.insert(
            (competency.user_id, competency.course_id, competency.lesson_id),
            competency.clone(),
        );
        Ok(())
    }

    async fn list_competencies(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<Competency>, StorageError> {
        Ok(self
            .lock()?
            .competencies
            .values()
            .filter(|c| c.user_id == user_id && c.course_id == course_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AdminReportRepository for InMemoryRepository {
    async fn upsert_report(&self, report: &AdminReport) -> Result<(), StorageError> {
        self.lock()?
            .reports
            .insert((report.student_id, report.course_id), report.clone());
        Ok(())
    }

    async fn get_report(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<AdminReport>, StorageError> {
        Ok(self.lock()?.reports.get(&(user_id, course_id)).cloned())
    }

    async fn delete_report(&self, user_id: UserId, course_id: CourseId) -> Result<bool, StorageError> {
        Ok(self.lock()?.reports.remove(&(user_id, course_id)).is_some())
    }

    async fn list_reports_page(&self, offset: u64, limit: u32) -> Result<Vec<AdminReport>, StorageError> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(self
            .lock()?
            .reports
            .values()
            .skip(skip)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NoteRepository for InMemoryRepository {
    async fn insert_new_note(&self, note: NewNoteRecord) -> Result<NoteId, StorageError> {
        let mut guard = self.lock()?;
        guard.last_note_id += 1;
        let id = NoteId::new(guard.last_note_id);
        let stored = Note::from_persisted(
            id,
            note.subject,
            note.author_id,
            note.body,
            false,
            Vec::new(),
            note.created_at,
        );
        guard.notes.insert(id, stored);
        Ok(id)
    }

    async fn update_note(&self, note: &Note) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard.notes.get_mut(&note.id).ok_or(StorageError::NotFound)?;
        *slot = note.clone();
        Ok(())
    }

    async fn get_note(&self, id: NoteId) -> Result<Option<Note>, StorageError> {
        Ok(self.lock()?.notes.get(&id).cloned())
    }

    async fn list_notes(&self, subject: NoteSubject) -> Result<Vec<Note>, StorageError> {
        let mut notes: Vec<Note> = self
            .lock()?
            .notes
            .values()
            .filter(|n| n.subject == subject)
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(notes)
    }

    async fn count_pinned(&self, subject: NoteSubject) -> Result<usize, StorageError> {
        Ok(self
            .lock()?
            .notes
            .values()
            .filter(|n| n.subject == subject && n.is_pinned())
            .count())
    }
}

#[async_trait]
impl WorkPlacementRepository for InMemoryRepository {
    async fn insert_new_placement(
        &self,
        placement: &WorkPlacement,
    ) -> Result<WorkPlacementId, StorageError> {
        let mut guard = self.lock()?;
        guard.last_placement_id += 1;
        let id = WorkPlacementId::new(guard.last_placement_id);
        let mut stored = placement.clone();
        stored.id = id;
        guard.placements.insert(id, stored);
        Ok(id)
    }

    async fn update_placement(&self, placement: &WorkPlacement) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let slot = guard
            .placements
            .get_mut(&placement.id)
            .ok_or(StorageError::NotFound)?;
        *slot = placement.clone();
        Ok(())
    }

    async fn get_placement(&self, id: WorkPlacementId) -> Result<Option<WorkPlacement>, StorageError> {
        Ok(self.lock()?.placements.get(&id).cloned())
    }

    async fn list_placements(&self, user_id: UserId) -> Result<Vec<WorkPlacement>, StorageError> {
        Ok(self
            .lock()?
            .placements
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}

fn removed(before: usize, after: usize) -> u64 {
    u64::try_from(before - after).unwrap_or(u64::MAX)
}

#[async_trait]
impl StudentDataRepository for InMemoryRepository {
    async fn purge_student(&self, user_id: UserId) -> Result<PurgeSummary, StorageError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if state.users.remove(&user_id).is_none() {
            return Err(StorageError::NotFound);
        }
        state.assignments.remove(&user_id);
        let subject = NoteSubject::Student(user_id);

        let mut summary = PurgeSummary {
            users: 1,
            ..PurgeSummary::default()
        };

        let n = state.enrolments.len();
        state.enrolments.retain(|_, e| e.user_id != user_id);
        summary.enrolments = removed(n, state.enrolments.len());

        let n = state.progress.len();
        state.progress.retain(|(u, _), _| *u != user_id);
        summary.progress = removed(n, state.progress.len());

        let n = state.attempts.len();
        state.attempts.retain(|_, a| a.user_id != user_id);
        summary.attempts = removed(n, state.attempts.len());

        let n = state.activity.len();
        state.activity.retain(|e| e.user_id != user_id);
        summary.activities = removed(n, state.activity.len());

        let n = state.competencies.len();
        state.competencies.retain(|(u, _, _), _| *u != user_id);
        summary.competencies = removed(n, state.competencies.len());

        let n = state.reports.len();
        state.reports.retain(|(u, _), _| *u != user_id);
        summary.reports = removed(n, state.reports.len());

        let n = state.notes.len();
        state.notes.retain(|_, note| note.subject != subject);
        summary.notes = removed(n, state.notes.len());

        let n = state.placements.len();
        state.placements.retain(|_, p| p.user_id != user_id);
        summary.placements = removed(n, state.placements.len());

        for assignment in state.assignments.values_mut() {
            assignment.trainer_ids.retain(|id| *id != user_id);
            assignment.leader_ids.retain(|id| *id != user_id);
        }

        Ok(summary)
    }
}

/// Aggregates every repository behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub courses: Arc<dyn CourseRepository>,
    pub users: Arc<dyn UserRepository>,
    pub enrolments: Arc<dyn EnrolmentRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub attempts: Arc<dyn QuizAttemptRepository>,
    pub activity: Arc<dyn ActivityRepository>,
    pub competencies: Arc<dyn CompetencyRepository>,
    pub reports: Arc<dyn AdminReportRepository>,
    pub notes: Arc<dyn NoteRepository>,
    pub placements: Arc<dyn WorkPlacementRepository>,
    pub student_data: Arc<dyn StudentDataRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every repository to one backend.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: CourseRepository
            + UserRepository
            + EnrolmentRepository
            + ProgressRepository
            + QuizAttemptRepository
            + ActivityRepository
            + CompetencyRepository
            + AdminReportRepository
            + NoteRepository
            + WorkPlacementRepository
            + StudentDataRepository
            + Clone
            + 'static,
    {
        Self {
            courses: Arc::new(repo.clone()),
            users: Arc::new(repo.clone()),
            enrolments: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            attempts: Arc::new(repo.clone()),
            activity: Arc::new(repo.clone()),
            competencies: Arc::new(repo.clone()),
            reports: Arc::new(repo.clone()),
            notes: Arc::new(repo.clone()),
            placements: Arc::new(repo.clone()),
            student_data: Arc::new(repo),
        }
    }
}
