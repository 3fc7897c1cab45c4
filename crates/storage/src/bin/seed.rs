use std::fmt;

use chrono::{DateTime, Duration, Utc};
use lms_core::model::course::fixtures;
use lms_core::model::{
    ActivityEvent, ActivityKind, AttemptId, AttemptStatus, Company, CompanyId, Course,
    EnrolmentPlan, ProgressDetails, QuizAttempt, Role, StudentAssignment, User, UserId,
};
use storage::repository::{NewUserRecord, SignupRecord, Storage};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    students: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidStudents { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidStudents { raw } => write!(f, "invalid --students value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("LMS_DB_URL").unwrap_or_else(|_| "sqlite://lms.sqlite3".into());
        let mut students = std::env::var("LMS_SEED_STUDENTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(3);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--students" => {
                    let value = require_value(&mut args, "--students")?;
                    students = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidStudents { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            students,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://lms.sqlite3)");
    eprintln!("  --students <n>            Number of students signed up (default: 3)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  LMS_DB_URL, LMS_SEED_STUDENTS");
}

fn staff(id: u64, first: &str, role: Role, company_id: Option<CompanyId>) -> User {
    User {
        id: UserId::new(id),
        first_name: first.into(),
        last_name: "Staff".into(),
        email: format!("{}@lms.test", first.to_lowercase()),
        role,
        company_id,
        is_active: true,
    }
}

/// Course 1 auto-registers into course 2.
fn demo_courses() -> Result<(Course, Course), Box<dyn std::error::Error>> {
    let mut first_info = fixtures::info(1, 30);
    first_info.title = "Certificate III in Early Childhood".into();
    first_info.auto_register_next_course = true;
    first_info.next_course_id = Some(lms_core::model::CourseId::new(2));
    let first = Course::new(first_info, fixtures::two_lesson_course(1).lessons().to_vec())?;

    let mut second_info = fixtures::info(2, 60);
    second_info.title = "Diploma of Early Childhood".into();
    let second = Course::new(second_info, fixtures::two_lesson_course(2).lessons().to_vec())?;
    Ok((first, second))
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let company = Company {
        id: CompanyId::new(1),
        name: "Sunrise Kids".into(),
    };
    storage.users.upsert_company(&company).await?;
    let trainer = staff(1, "Tess", Role::Trainer, None);
    let leader = staff(2, "Liam", Role::Leader, Some(company.id));
    storage.users.upsert_user(&trainer).await?;
    storage.users.upsert_user(&leader).await?;

    let (first, second) = demo_courses()?;
    storage.courses.upsert_course(&first).await?;
    storage.courses.upsert_course(&second).await?;

    let mut next_attempt = 1_u64;
    for i in 0..args.students {
        let start = now - Duration::days(i64::from(i) * 5);
        let email = format!("student{}@lms.test", i + 1);
        let plan = EnrolmentPlan::for_signup(&first, Some(&second), start)?;
        let outcome = storage
            .enrolments
            .commit_signup(SignupRecord {
                student: NewUserRecord {
                    first_name: "Student".into(),
                    last_name: format!("{}", i + 1),
                    email,
                    role: Role::Student,
                    company_id: Some(company.id),
                    is_active: true,
                },
                leader_id: Some(leader.id),
                plan,
                is_chargeable: true,
                initial_progress: vec![
                    (first.id(), ProgressDetails::zeroed(&first)),
                    (second.id(), ProgressDetails::zeroed(&second)),
                ],
                created_at: start,
            })
            .await?;

        let mut assignment = StudentAssignment::empty(outcome.student_id);
        assignment.trainer_ids.push(trainer.id);
        assignment.leader_ids.push(leader.id);
        storage.users.set_assignment(&assignment).await?;

        let lesson = &first.lessons()[0];
        storage
            .activity
            .append_activity(&ActivityEvent {
                user_id: outcome.student_id,
                course_id: first.id(),
                lesson_id: Some(lesson.id),
                kind: ActivityKind::LessonStart,
                occurred_at: start + Duration::hours(1),
            })
            .await?;

        // Student n has passed the first n quizzes of the first course.
        for quiz in first.gating_quizzes().take(i as usize) {
            let mut attempt = QuizAttempt::start(
                AttemptId::new(next_attempt),
                outcome.student_id,
                first.id(),
                quiz.id,
                1,
                start + Duration::hours(2),
            )?;
            attempt.submit(serde_json::json!({ "answers": [] }), start + Duration::hours(3))?;
            attempt.transition(AttemptStatus::Reviewing, start + Duration::hours(4))?;
            attempt.transition(AttemptStatus::Satisfactory, start + Duration::hours(5))?;
            storage.attempts.upsert_attempt(&attempt).await?;
            next_attempt += 1;
        }
    }

    println!(
        "Seeded {} students into courses {} and {} at {}",
        args.students,
        first.id(),
        second.id(),
        args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
