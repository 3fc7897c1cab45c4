use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{AttemptId, CourseId, QuizId, UserId};
use crate::model::progress::QuizStatus;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("cannot move attempt from {from} to {to}")]
    InvalidTransition {
        from: AttemptStatus,
        to: AttemptStatus,
    },

    #[error("unknown attempt status: {0}")]
    UnknownStatus(String),

    #[error("unknown system result: {0}")]
    UnknownSystemResult(String),

    #[error("attempt numbers start at 1")]
    InvalidAttemptNumber,
}

//
// ─── STATES ────────────────────────────────────────────────────────────────────
//

/// Machine-side evaluation state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemResult {
    InProgress,
    Completed,
    Evaluated,
    Marked,
}

impl SystemResult {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SystemResult::InProgress => "INPROGRESS",
            SystemResult::Completed => "COMPLETED",
            SystemResult::Evaluated => "EVALUATED",
            SystemResult::Marked => "MARKED",
        }
    }
}

impl FromStr for SystemResult {
    type Err = AttemptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INPROGRESS" => Ok(SystemResult::InProgress),
            "COMPLETED" => Ok(SystemResult::Completed),
            "EVALUATED" => Ok(SystemResult::Evaluated),
            "MARKED" => Ok(SystemResult::Marked),
            other => Err(AttemptError::UnknownSystemResult(other.to_string())),
        }
    }
}

/// Assessment workflow state of an attempt.
///
/// `Attempting → Submitted → Reviewing → {Returned, Satisfactory, Fail}`;
/// `Overdue` is terminal and reachable before review starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Attempting,
    Submitted,
    Reviewing,
    Returned,
    Satisfactory,
    Fail,
    Overdue,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Attempting => "ATTEMPTING",
            AttemptStatus::Submitted => "SUBMITTED",
            AttemptStatus::Reviewing => "REVIEWING",
            AttemptStatus::Returned => "RETURNED",
            AttemptStatus::Satisfactory => "SATISFACTORY",
            AttemptStatus::Fail => "FAIL",
            AttemptStatus::Overdue => "OVERDUE",
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::{
            Attempting, Fail, Overdue, Returned, Reviewing, Satisfactory, Submitted,
        };
        matches!(
            (self, next),
            (Attempting, Submitted | Overdue)
                | (Submitted, Reviewing | Overdue)
                | (Reviewing, Returned | Satisfactory | Fail)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Returned
                | AttemptStatus::Satisfactory
                | AttemptStatus::Fail
                | AttemptStatus::Overdue
        )
    }

    /// True once the student has handed the attempt in, whatever the verdict.
    #[must_use]
    pub fn is_handed_in(self) -> bool {
        !matches!(self, AttemptStatus::Attempting | AttemptStatus::Overdue)
    }

    #[must_use]
    pub fn system_result(self) -> SystemResult {
        match self {
            AttemptStatus::Attempting => SystemResult::InProgress,
            AttemptStatus::Submitted | AttemptStatus::Overdue => SystemResult::Completed,
            AttemptStatus::Reviewing => SystemResult::Evaluated,
            AttemptStatus::Returned | AttemptStatus::Satisfactory | AttemptStatus::Fail => {
                SystemResult::Marked
            }
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = AttemptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTEMPTING" => Ok(AttemptStatus::Attempting),
            "SUBMITTED" => Ok(AttemptStatus::Submitted),
            "REVIEWING" => Ok(AttemptStatus::Reviewing),
            "RETURNED" => Ok(AttemptStatus::Returned),
            "SATISFACTORY" => Ok(AttemptStatus::Satisfactory),
            "FAIL" => Ok(AttemptStatus::Fail),
            "OVERDUE" => Ok(AttemptStatus::Overdue),
            other => Err(AttemptError::UnknownStatus(other.to_string())),
        }
    }
}

impl From<AttemptStatus> for QuizStatus {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Attempting => QuizStatus::Attempting,
            // Still awaiting a verdict from the student's point of view.
            AttemptStatus::Submitted | AttemptStatus::Reviewing => QuizStatus::Submitted,
            AttemptStatus::Returned => QuizStatus::Returned,
            AttemptStatus::Satisfactory => QuizStatus::Passed,
            AttemptStatus::Fail => QuizStatus::Failed,
            AttemptStatus::Overdue => QuizStatus::Overdue,
        }
    }
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// One submission attempt at a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAttempt {
    pub id: AttemptId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub quiz_id: QuizId,
    pub attempt: u32,
    pub answers: serde_json::Value,
    status: AttemptStatus,
    system_result: SystemResult,
    pub submitted_at: Option<DateTime<Utc>>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QuizAttempt {
    /// Starts a fresh attempt in `Attempting`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidAttemptNumber` for attempt 0.
    pub fn start(
        id: AttemptId,
        user_id: UserId,
        course_id: CourseId,
        quiz_id: QuizId,
        attempt: u32,
        at: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if attempt == 0 {
            return Err(AttemptError::InvalidAttemptNumber);
        }
        Ok(Self {
            id,
            user_id,
            course_id,
            quiz_id,
            attempt,
            answers: serde_json::Value::Null,
            status: AttemptStatus::Attempting,
            system_result: SystemResult::InProgress,
            submitted_at: None,
            evaluated_at: None,
            created_at: at,
        })
    }

    /// Rehydrates a stored attempt without replaying transitions.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_persisted(
        id: AttemptId,
        user_id: UserId,
        course_id: CourseId,
        quiz_id: QuizId,
        attempt: u32,
        answers: serde_json::Value,
        status: AttemptStatus,
        system_result: SystemResult,
        submitted_at: Option<DateTime<Utc>>,
        evaluated_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            course_id,
            quiz_id,
            attempt,
            answers,
            status,
            system_result,
            submitted_at,
            evaluated_at,
            created_at,
        }
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    #[must_use]
    pub fn system_result(&self) -> SystemResult {
        self.system_result
    }

    /// Moves the attempt along its state machine.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidTransition` for moves the workflow forbids.
    pub fn transition(&mut self, next: AttemptStatus, at: DateTime<Utc>) -> Result<(), AttemptError> {
        if !self.status.can_transition_to(next) {
            return Err(AttemptError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            AttemptStatus::Submitted => self.submitted_at = Some(at),
            AttemptStatus::Returned | AttemptStatus::Satisfactory | AttemptStatus::Fail => {
                self.evaluated_at = Some(at);
            }
            _ => {}
        }
        self.status = next;
        self.system_result = next.system_result();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `AttemptError::InvalidTransition` unless the attempt is `Attempting`.
    pub fn submit(&mut self, answers: serde_json::Value, at: DateTime<Utc>) -> Result<(), AttemptError> {
        self.transition(AttemptStatus::Submitted, at)?;
        self.answers = answers;
        Ok(())
    }
}

/// Latest attempt per quiz, by attempt number then creation time.
#[must_use]
pub fn latest_attempts<'a>(
    attempts: impl IntoIterator<Item = &'a QuizAttempt>,
) -> HashMap<QuizId, &'a QuizAttempt> {
    let mut latest: HashMap<QuizId, &QuizAttempt> = HashMap::new();
    for attempt in attempts {
        latest
            .entry(attempt.quiz_id)
            .and_modify(|current| {
                if (attempt.attempt, attempt.created_at, attempt.id)
                    > (current.attempt, current.created_at, current.id)
                {
                    *current = attempt;
                }
            })
            .or_insert(attempt);
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn attempt(id: u64, quiz: u64, number: u32) -> QuizAttempt {
        QuizAttempt::start(
            AttemptId::new(id),
            UserId::new(1),
            CourseId::new(1),
            QuizId::new(quiz),
            number,
            fixed_now() + Duration::minutes(i64::from(number)),
        )
        .unwrap()
    }

    #[test]
    fn happy_path_reaches_satisfactory() {
        let mut a = attempt(1, 1, 1);
        a.submit(serde_json::json!({"q1": "b"}), fixed_now()).unwrap();
        assert_eq!(a.system_result(), SystemResult::Completed);
        a.transition(AttemptStatus::Reviewing, fixed_now()).unwrap();
        assert_eq!(a.system_result(), SystemResult::Evaluated);
        a.transition(AttemptStatus::Satisfactory, fixed_now()).unwrap();
        assert_eq!(a.system_result(), SystemResult::Marked);
        assert!(a.evaluated_at.is_some());
        assert!(a.status().is_terminal());
    }

    #[test]
    fn review_cannot_be_skipped() {
        let mut a = attempt(1, 1, 1);
        a.submit(serde_json::Value::Null, fixed_now()).unwrap();
        let err = a.transition(AttemptStatus::Satisfactory, fixed_now()).unwrap_err();
        assert_eq!(
            err,
            AttemptError::InvalidTransition {
                from: AttemptStatus::Submitted,
                to: AttemptStatus::Satisfactory
            }
        );
    }

    #[test]
    fn overdue_is_terminal() {
        let mut a = attempt(1, 1, 1);
        a.transition(AttemptStatus::Overdue, fixed_now()).unwrap();
        assert!(a.transition(AttemptStatus::Submitted, fixed_now()).is_err());
        assert!(!a.status().is_handed_in());
    }

    #[test]
    fn attempt_zero_is_rejected() {
        let err = QuizAttempt::start(
            AttemptId::new(1),
            UserId::new(1),
            CourseId::new(1),
            QuizId::new(1),
            0,
            fixed_now(),
        )
        .unwrap_err();
        assert_eq!(err, AttemptError::InvalidAttemptNumber);
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            "ATTEMPTING",
            "SUBMITTED",
            "REVIEWING",
            "RETURNED",
            "SATISFACTORY",
            "FAIL",
            "OVERDUE",
        ] {
            assert_eq!(s.parse::<AttemptStatus>().unwrap().as_str(), s);
        }
        assert_eq!("INPROGRESS".parse::<SystemResult>().unwrap(), SystemResult::InProgress);
    }

    #[test]
    fn reviewing_maps_to_submitted_quiz_status() {
        assert_eq!(QuizStatus::from(AttemptStatus::Reviewing), QuizStatus::Submitted);
        assert_eq!(QuizStatus::from(AttemptStatus::Satisfactory), QuizStatus::Passed);
        assert_eq!(QuizStatus::from(AttemptStatus::Overdue), QuizStatus::Overdue);
    }

    #[test]
    fn latest_attempt_wins_per_quiz() {
        let attempts = vec![attempt(1, 1, 1), attempt(2, 1, 3), attempt(3, 1, 2), attempt(4, 2, 1)];
        let latest = latest_attempts(&attempts);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&QuizId::new(1)].id, AttemptId::new(2));
        assert_eq!(latest[&QuizId::new(2)].id, AttemptId::new(4));
    }
}
