use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CompanyId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UserError {
    #[error("first name cannot be empty")]
    EmptyFirstName,

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Leader,
    Trainer,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Leader => "leader",
            Role::Trainer => "trainer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "leader" => Ok(Role::Leader),
            "trainer" => Ok(Role::Trainer),
            "admin" => Ok(Role::Admin),
            other => Err(UserError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub company_id: Option<CompanyId>,
    pub is_active: bool,
}

impl User {
    /// Validates the user's name and email.
    ///
    /// # Errors
    ///
    /// Returns `UserError` for a blank first name or an email without `@`.
    pub fn validate(&self) -> Result<(), UserError> {
        if self.first_name.trim().is_empty() {
            return Err(UserError::EmptyFirstName);
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(UserError::InvalidEmail(self.email.clone())),
        }
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        let first = self.first_name.trim();
        let last = self.last_name.trim();
        if last.is_empty() {
            first.to_string()
        } else {
            format!("{first} {last}")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
}

/// Trainers and leaders responsible for a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentAssignment {
    pub student_id: UserId,
    pub trainer_ids: Vec<UserId>,
    pub leader_ids: Vec<UserId>,
}

impl StudentAssignment {
    #[must_use]
    pub fn empty(student_id: UserId) -> Self {
        Self {
            student_id,
            trainer_ids: Vec::new(),
            leader_ids: Vec::new(),
        }
    }
}
