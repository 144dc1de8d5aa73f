//! Core of the secret gift exchange: participants, redemption codes and the
//! derangement that pairs every giver with a receiver.

mod code;
mod draw;
mod session;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use code::{mask_code, RedemptionCode, CODE_ALPHABET, CODE_LEN, CODE_PREFIX};
pub use draw::{assign, assign_with_attempts, MAX_ATTEMPTS, MIN_PARTICIPANTS};
pub use session::{Session, MAX_NAME_LEN};

/// A sanitized, non-empty display name. Equality is case-sensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Participant(String);

impl Participant {
    /// Trims the input, drops control characters and rejects empty or
    /// over-long names.
    pub fn new(raw: &str) -> Result<Self, DrawError> {
        let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
        let name = cleaned.trim();
        if name.is_empty() {
            return Err(DrawError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DrawError::NameTooLong { max: MAX_NAME_LEN });
        }
        Ok(Self(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub giver: Participant,
    pub receiver: Participant,
    pub code: RedemptionCode,
}

/// Groups the records written by one drawing. Never used for lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DrawingId(String);

impl DrawingId {
    pub fn from_millis(millis: i64) -> Self {
        Self(format!("sorteo-{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DrawingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("name required")]
    EmptyName,
    #[error("name longer than {max} characters")]
    NameTooLong { max: usize },
    #[error("name already taken: {0}")]
    DuplicateName(String),
    #[error("at least {required} participants required, found {found}")]
    TooFewParticipants { required: usize, found: usize },
    #[error("code required")]
    EmptyCode,
    #[error("could not generate a valid drawing after {attempts} attempts")]
    AssignmentExhausted { attempts: usize },
}

impl DrawError {
    /// Input problems the caller can fix; these are never retried.
    pub fn is_validation(&self) -> bool {
        !matches!(self, DrawError::AssignmentExhausted { .. })
    }
}
