use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an id from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
    raw: String,
}

impl ParseIdError {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from {:?}", self.kind, self.raw)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self::new).map_err(|_| ParseIdError {
                    kind: stringify!($name),
                    raw: s.to_string(),
                })
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for any user (student, leader, trainer or admin).
    UserId
);
numeric_id!(
    /// Unique identifier for an employer company.
    CompanyId
);
numeric_id!(
    /// Unique identifier for a course.
    CourseId
);
numeric_id!(LessonId);
numeric_id!(TopicId);
numeric_id!(QuizId);
numeric_id!(
    /// Unique identifier for a student's enrolment row.
    EnrolmentId
);
numeric_id!(AttemptId);
numeric_id!(NoteId);
numeric_id!(WorkPlacementId);

/// Parses a comma-separated list of ids, rejecting the whole list on the first bad token.
///
/// Blank tokens (e.g. a trailing comma) are skipped; duplicates are dropped
/// while preserving first-seen order.
///
/// # Errors
///
/// Returns `ParseIdError` for the first token that is not a valid id.
pub fn parse_id_list<T>(raw: &str) -> Result<Vec<T>, ParseIdError>
where
    T: FromStr<Err = ParseIdError> + PartialEq,
{
    let mut out: Vec<T> = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let id = token.parse::<T>()?;
        if !out.contains(&id) {
            out.push(id);
        }
    }
    Ok(out)
}
