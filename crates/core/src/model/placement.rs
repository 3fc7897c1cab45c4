use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{CourseId, UserId, WorkPlacementId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkPlacementError {
    #[error("employer name cannot be empty")]
    EmptyEmployer,

    #[error("placement ends ({end}) before it starts ({start})")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
}

/// One recorded edit of a placement field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
    pub by: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlacement {
    pub id: WorkPlacementId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub employer_name: String,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub field_changes: Vec<FieldChange>,
    pub created_at: DateTime<Utc>,
}

/// Partial edit; `None` leaves a field untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlacementUpdate {
    pub employer_name: Option<String>,
    pub contact_name: Option<Option<String>>,
    pub contact_email: Option<Option<String>>,
    pub contact_phone: Option<Option<String>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
}

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), WorkPlacementError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err(WorkPlacementError::EndBeforeStart { start, end })
        }
        _ => Ok(()),
    }
}

impl WorkPlacement {
    /// # Errors
    ///
    /// Returns `WorkPlacementError` for a blank employer or inverted dates.
    pub fn validate(&self) -> Result<(), WorkPlacementError> {
        if self.employer_name.trim().is_empty() {
            return Err(WorkPlacementError::EmptyEmployer);
        }
        check_dates(self.start_date, self.end_date)
    }

    /// Applies the edit and records one `FieldChange` per field whose value changed.
    ///
    /// Nothing is modified when validation fails. Returns the number of changes recorded.
    ///
    /// # Errors
    ///
    /// Returns `WorkPlacementError` if the edited placement would be invalid.
    pub fn apply(
        &mut self,
        update: WorkPlacementUpdate,
        by: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize, WorkPlacementError> {
        let mut next = self.clone();
        let mut changes = Vec::new();
        let mut track = |field: &str, old: Option<String>, new: Option<String>| {
            if old != new {
                changes.push(FieldChange {
                    field: field.to_string(),
                    old,
                    new,
                    by,
                    at,
                });
            }
        };

        if let Some(name) = update.employer_name {
            track("employer_name", Some(next.employer_name.clone()), Some(name.clone()));
            next.employer_name = name;
        }
        if let Some(v) = update.contact_name {
            track("contact_name", next.contact_name.clone(), v.clone());
            next.contact_name = v;
        }
        if let Some(v) = update.contact_email {
            track("contact_email", next.contact_email.clone(), v.clone());
            next.contact_email = v;
        }
        if let Some(v) = update.contact_phone {
            track("contact_phone", next.contact_phone.clone(), v.clone());
            next.contact_phone = v;
        }
        if let Some(v) = update.start_date {
            track(
                "start_date",
                next.start_date.map(|d| d.to_string()),
                v.map(|d| d.to_string()),
            );
            next.start_date = v;
        }
        if let Some(v) = update.end_date {
            track(
                "end_date",
                next.end_date.map(|d| d.to_string()),
                v.map(|d| d.to_string()),
            );
            next.end_date = v;
        }

        next.validate()?;
        let recorded = changes.len();
        next.field_changes.extend(changes);
        *self = next;
        Ok(recorded)
    }
}
