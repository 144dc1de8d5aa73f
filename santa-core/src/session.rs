use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{assign, Assignment, DrawError, Participant, MIN_PARTICIPANTS};

pub const MAX_NAME_LEN: usize = 64;

/// Participants gathered by one organizer. Names are unique on insert and
/// keep their insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    participants: Vec<Participant>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, raw_name: &str) -> Result<&Participant, DrawError> {
        let participant = Participant::new(raw_name)?;
        if self.participants.contains(&participant) {
            return Err(DrawError::DuplicateName(participant.name().to_string()));
        }
        self.participants.push(participant);
        Ok(&self.participants[self.participants.len() - 1])
    }

    pub fn remove(&mut self, name: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.name() == name)?;
        Some(self.participants.remove(idx))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn can_draw(&self) -> bool {
        self.participants.len() >= MIN_PARTICIPANTS
    }

    pub fn reset(&mut self) {
        self.participants.clear();
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Assignment>, DrawError> {
        assign(&self.participants, rng)
    }
}
