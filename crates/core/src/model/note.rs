use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{CompanyId, NoteId, UserId};

/// Maximum number of pinned notes per subject.
pub const MAX_PINNED_NOTES: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NoteError {
    #[error("note body cannot be empty")]
    EmptyBody,

    #[error("{subject} already has the maximum number of pinned notes")]
    PinLimit { subject: NoteSubject },

    #[error("note is already pinned")]
    AlreadyPinned,

    #[error("note is not pinned")]
    NotPinned,

    #[error("unknown note subject kind: {0}")]
    UnknownSubjectKind(String),
}

/// What a note is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum NoteSubject {
    Company(CompanyId),
    Student(UserId),
}

impl NoteSubject {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            NoteSubject::Company(_) => "company",
            NoteSubject::Student(_) => "student",
        }
    }

    #[must_use]
    pub fn raw_id(self) -> u64 {
        match self {
            NoteSubject::Company(id) => id.value(),
            NoteSubject::Student(id) => id.value(),
        }
    }

    /// Rebuilds a subject from its stored `(kind, id)` pair.
    ///
    /// # Errors
    ///
    /// Returns `NoteError::UnknownSubjectKind` for anything other than
    /// `company` or `student`.
    pub fn from_parts(kind: &str, id: u64) -> Result<Self, NoteError> {
        match kind {
            "company" => Ok(NoteSubject::Company(CompanyId::new(id))),
            "student" => Ok(NoteSubject::Student(UserId::new(id))),
            other => Err(NoteError::UnknownSubjectKind(other.to_string())),
        }
    }
}

impl fmt::Display for NoteSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.raw_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinAction {
    Pinned,
    Unpinned,
}

/// Append-only audit entry of a pin change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinLogEntry {
    pub action: PinAction,
    pub by: UserId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub subject: NoteSubject,
    pub author_id: UserId,
    pub body: String,
    is_pinned: bool,
    pin_log: Vec<PinLogEntry>,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// # Errors
    ///
    /// Returns `NoteError::EmptyBody` for whitespace-only text.
    pub fn new(
        id: NoteId,
        subject: NoteSubject,
        author_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, NoteError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(NoteError::EmptyBody);
        }
        Ok(Self {
            id,
            subject,
            author_id,
            body,
            is_pinned: false,
            pin_log: Vec::new(),
            created_at,
        })
    }

    #[must_use]
    pub fn from_persisted(
        id: NoteId,
        subject: NoteSubject,
        author_id: UserId,
        body: String,
        is_pinned: bool,
        pin_log: Vec<PinLogEntry>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject,
            author_id,
            body,
            is_pinned,
            pin_log,
            created_at,
        }
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.is_pinned
    }

    #[must_use]
    pub fn pin_log(&self) -> &[PinLogEntry] {
        &self.pin_log
    }

    /// Pins the note given how many notes the subject already has pinned.
    ///
    /// # Errors
    ///
    /// Returns `NoteError::AlreadyPinned` or `NoteError::PinLimit`.
    pub fn pin(&mut self, pinned_count: usize, by: UserId, at: DateTime<Utc>) -> Result<(), NoteError> {
        if self.is_pinned {
            return Err(NoteError::AlreadyPinned);
        }
        if pinned_count >= MAX_PINNED_NOTES {
            return Err(NoteError::PinLimit {
                subject: self.subject,
            });
        }
        self.is_pinned = true;
        self.pin_log.push(PinLogEntry {
            action: PinAction::Pinned,
            by,
            at,
        });
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NoteError::NotPinned` when the note is not pinned.
    pub fn unpin(&mut self, by: UserId, at: DateTime<Utc>) -> Result<(), NoteError> {
        if !self.is_pinned {
            return Err(NoteError::NotPinned);
        }
        self.is_pinned = false;
        self.pin_log.push(PinLogEntry {
            action: PinAction::Unpinned,
            by,
            at,
        });
        Ok(())
    }
}
