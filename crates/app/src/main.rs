use std::collections::BTreeSet;
use std::fmt;
use std::io::BufWriter;

use chrono::FixedOffset;
use lms_core::model::{CourseId, UserId, parse_id_list};
use lms_core::time::parse_utc_offset;
use lms_core::training_plan::TrainingPlanSettings;
use serde_json::{Value, json};
use services::{
    AdminToolError, AppServices, AppServicesError, Clock, ExportError, LessonDateError,
    ReportColumn,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CHUNK: u32 = 200;
const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    UnknownCommand(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidChunk { raw: String },
    InvalidDbUrl { raw: String },
    InvalidTimezone { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidChunk { raw } => write!(f, "invalid --chunk value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidTimezone { raw } => {
                write!(f, "invalid LMS_TIMEZONE value (expected e.g. +10:00): {raw}")
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

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  lms-admin migrate");
    eprintln!("  lms-admin sync-student-profiles --users <id,id,...>");
    eprintln!("  lms-admin test-service-consistency --user <id> --course <id>");
    eprintln!("  lms-admin export-reports --out <path> [--columns <name,name,...>]");
    eprintln!("  lms-admin sync-competencies [--chunk <n>]");
    eprintln!("  lms-admin backfill-lesson-ends [--chunk <n>]");
    eprintln!("  lms-admin purge-student --user <id>");
    eprintln!();
    eprintln!("Every command accepts --db <sqlite_url> (default sqlite://lms.sqlite3).");
    eprintln!();
    eprintln!("Environment (a .env file is read if present):");
    eprintln!("  LMS_DB_URL, LMS_LLN_COURSE_IDS, LMS_PTR_COURSE_IDS, LMS_TIMEZONE, LMS_LOG");
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
struct Config {
    db_url: String,
    settings: TrainingPlanSettings,
    tz: FixedOffset,
}

impl Config {
    fn from_env() -> Result<Self, ArgsError> {
        let db_url = std::env::var("LMS_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://lms.sqlite3".into(), normalize_sqlite_url);
        let settings = TrainingPlanSettings {
            lln_course_ids: course_ids_from_env("LMS_LLN_COURSE_IDS")?,
            ptr_course_ids: course_ids_from_env("LMS_PTR_COURSE_IDS")?,
        };
        let tz = match std::env::var("LMS_TIMEZONE") {
            Ok(raw) => parse_utc_offset(&raw).ok_or(ArgsError::InvalidTimezone { raw })?,
            Err(_) => FixedOffset::east_opt(0).ok_or(ArgsError::InvalidTimezone {
                raw: "+00:00".into(),
            })?,
        };
        Ok(Self {
            db_url,
            settings,
            tz,
        })
    }
}

fn course_ids_from_env(var: &'static str) -> Result<BTreeSet<CourseId>, ArgsError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(BTreeSet::new());
    };
    parse_id_list::<CourseId>(&raw)
        .map(|ids| ids.into_iter().collect())
        .map_err(|_| ArgsError::InvalidId { flag: var, raw })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Migrate,
    SyncStudentProfiles { users: String },
    TestServiceConsistency { user: UserId, course: CourseId },
    ExportReports { out: String, columns: Option<String> },
    SyncCompetencies { chunk: u32 },
    BackfillLessonEnds { chunk: u32 },
    PurgeStudent { user: UserId },
}

/// Flags gathered for whichever subcommand was named.
#[derive(Default)]
struct Flags {
    users: Option<String>,
    user: Option<UserId>,
    course: Option<CourseId>,
    out: Option<String>,
    columns: Option<String>,
    chunk: Option<u32>,
}

fn parse_id<T: std::str::FromStr>(flag: &'static str, raw: String) -> Result<T, ArgsError> {
    raw.parse::<T>()
        .map_err(|_| ArgsError::InvalidId { flag, raw })
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
    config: &mut Config,
) -> Result<Command, ArgsError> {
    let name = args.next().ok_or(ArgsError::MissingFlag {
        flag: "subcommand",
    })?;
    if name == "--help" || name == "-h" {
        print_usage();
        std::process::exit(0);
    }

    let mut flags = Flags::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => {
                let value = require_value(&mut args, "--db")?;
                if value.trim().is_empty() {
                    return Err(ArgsError::InvalidDbUrl { raw: value });
                }
                config.db_url = normalize_sqlite_url(value);
            }
            "--users" => flags.users = Some(require_value(&mut args, "--users")?),
            "--user" => flags.user = Some(parse_id("--user", require_value(&mut args, "--user")?)?),
            "--course" => {
                flags.course = Some(parse_id("--course", require_value(&mut args, "--course")?)?);
            }
            "--out" => flags.out = Some(require_value(&mut args, "--out")?),
            "--columns" => flags.columns = Some(require_value(&mut args, "--columns")?),
            "--chunk" => {
                let value = require_value(&mut args, "--chunk")?;
                let parsed = value
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(ArgsError::InvalidChunk { raw: value })?;
                flags.chunk = Some(parsed);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgsError::UnknownArg(arg)),
        }
    }

    let chunk = flags.chunk.unwrap_or(DEFAULT_CHUNK);
    let command = match name.as_str() {
        "migrate" => Command::Migrate,
        "sync-student-profiles" => Command::SyncStudentProfiles {
            users: flags.users.ok_or(ArgsError::MissingFlag { flag: "--users" })?,
        },
        "test-service-consistency" => Command::TestServiceConsistency {
            user: flags.user.ok_or(ArgsError::MissingFlag { flag: "--user" })?,
            course: flags.course.ok_or(ArgsError::MissingFlag { flag: "--course" })?,
        },
        "export-reports" => Command::ExportReports {
            out: flags.out.ok_or(ArgsError::MissingFlag { flag: "--out" })?,
            columns: flags.columns,
        },
        "sync-competencies" => Command::SyncCompetencies { chunk },
        "backfill-lesson-ends" => Command::BackfillLessonEnds { chunk },
        "purge-student" => Command::PurgeStudent {
            user: flags.user.ok_or(ArgsError::MissingFlag { flag: "--user" })?,
        },
        _ => return Err(ArgsError::UnknownCommand(name)),
    };
    Ok(command)
}

fn normalize_sqlite_url(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:"
        || trimmed.starts_with("sqlite://")
        || trimmed.starts_with("sqlite:file:")
    {
        return trimmed.to_string();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> std::io::Result<()> {
    let Some(path) = db_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Ok(());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

/// A failed command, rendered as the JSON error body.
#[derive(Debug)]
struct Failure {
    status: u16,
    message: String,
}

impl Failure {
    fn internal(err: impl fmt::Display) -> Self {
        Self {
            status: 500,
            message: err.to_string(),
        }
    }

    fn to_json(&self) -> Value {
        json!({ "success": false, "status": self.status, "message": self.message })
    }
}

impl From<ArgsError> for Failure {
    fn from(err: ArgsError) -> Self {
        Self {
            status: 400,
            message: err.to_string(),
        }
    }
}

impl From<AdminToolError> for Failure {
    fn from(err: AdminToolError) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

impl From<LessonDateError> for Failure {
    fn from(err: LessonDateError) -> Self {
        AdminToolError::from(err).into()
    }
}

impl From<ExportError> for Failure {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::UnknownColumn(_) | ExportError::NoColumns => Self {
                status: 400,
                message: err.to_string(),
            },
            other => Self::internal(other),
        }
    }
}

impl From<AppServicesError> for Failure {
    fn from(err: AppServicesError) -> Self {
        Self::internal(err)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(Failure::internal)
}

async fn execute(command: Command, config: Config) -> Result<Value, Failure> {
    prepare_sqlite_file(&config.db_url)?;
    // Opening the services runs any pending migrations.
    let services =
        AppServices::new_sqlite(&config.db_url, Clock::default_clock(), config.settings, config.tz)
            .await?;

    match command {
        Command::Migrate => {
            info!(db = %config.db_url, "database migrated");
            Ok(json!({ "success": true, "database": config.db_url }))
        }
        Command::SyncStudentProfiles { users } => {
            let report = services.admin_tools().sync_student_profiles(&users).await?;
            to_json(&report)
        }
        Command::TestServiceConsistency { user, course } => {
            let report = services
                .admin_tools()
                .test_service_consistency(user, course)
                .await?;
            let mut body = to_json(&report)?;
            body["consistent"] = Value::Bool(report.is_consistent());
            Ok(body)
        }
        Command::ExportReports { out, columns } => {
            let columns = match columns {
                Some(raw) => ReportColumn::parse_list(&raw)?,
                None => ReportColumn::ALL.to_vec(),
            };
            let file = std::fs::File::create(&out)?;
            let totals = services
                .export()
                .export_csv(BufWriter::new(file), &columns, DEFAULT_PAGE_SIZE)
                .await?;
            Ok(json!({
                "success": true,
                "path": out,
                "mean_percentage": totals.mean_percentage(),
                "totals": to_json(&totals)?,
            }))
        }
        Command::SyncCompetencies { chunk } => {
            let report = services.lesson_dates().sync_competencies(chunk).await?;
            Ok(json!({ "success": report.failures.is_empty(), "report": to_json(&report)? }))
        }
        Command::BackfillLessonEnds { chunk } => {
            let report = services.lesson_dates().backfill_lesson_end_dates(chunk).await?;
            Ok(json!({ "success": report.failures.is_empty(), "report": to_json(&report)? }))
        }
        Command::PurgeStudent { user } => {
            let report = services.admin_tools().purge_student(user).await?;
            to_json(&report)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LMS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr so stdout stays machine-readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run() -> Result<Value, Failure> {
    let mut config = Config::from_env()?;
    let command = parse_args(std::env::args().skip(1), &mut config).inspect_err(|_| {
        print_usage();
    })?;
    execute(command, config).await
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(body) => println!("{body}"),
        Err(failure) => {
            println!("{}", failure.to_json());
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            db_url: "sqlite://lms.sqlite3".into(),
            settings: TrainingPlanSettings::default(),
            tz: FixedOffset::east_opt(0).unwrap(),
        }
    }

    fn parse(args: &[&str]) -> Result<Command, ArgsError> {
        parse_args(args.iter().map(ToString::to_string), &mut config())
    }

    #[test]
    fn consistency_requires_both_ids() {
        assert_eq!(
            parse(&["test-service-consistency", "--user", "4", "--course", "9"]).unwrap(),
            Command::TestServiceConsistency {
                user: UserId::new(4),
                course: CourseId::new(9),
            }
        );
        assert!(matches!(
            parse(&["test-service-consistency", "--user", "4"]),
            Err(ArgsError::MissingFlag { flag: "--course" })
        ));
        assert!(matches!(
            parse(&["purge-student", "--user", "x"]),
            Err(ArgsError::InvalidId { flag: "--user", .. })
        ));
    }

    #[test]
    fn chunk_defaults_and_rejects_zero() {
        assert_eq!(
            parse(&["sync-competencies"]).unwrap(),
            Command::SyncCompetencies { chunk: DEFAULT_CHUNK }
        );
        assert!(matches!(
            parse(&["sync-competencies", "--chunk", "0"]),
            Err(ArgsError::InvalidChunk { .. })
        ));
    }

    #[test]
    fn user_list_is_passed_through_unparsed() {
        assert_eq!(
            parse(&["sync-student-profiles", "--users", "1,abc"]).unwrap(),
            Command::SyncStudentProfiles {
                users: "1,abc".into()
            }
        );
        let failure = Failure::from(AdminToolError::BadRequest("bad id".into()));
        assert_eq!(failure.to_json()["status"], 400);
        assert_eq!(failure.to_json()["success"], false);
    }
}
