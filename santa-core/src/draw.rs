use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use crate::{Assignment, DrawError, Participant, RedemptionCode};

pub const MIN_PARTICIPANTS: usize = 3;
pub const MAX_ATTEMPTS: usize = 100;

/// Pairs every participant with a receiver other than themselves and
/// attaches a fresh code to each pair.
pub fn assign<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<Vec<Assignment>, DrawError> {
    assign_with_attempts(participants, MAX_ATTEMPTS, rng)
}

pub fn assign_with_attempts<R: Rng + ?Sized>(
    participants: &[Participant],
    max_attempts: usize,
    rng: &mut R,
) -> Result<Vec<Assignment>, DrawError> {
    validate_pool(participants)?;

    for _ in 0..max_attempts {
        let Some(pairs) = try_pairing(participants, rng) else {
            continue;
        };

        let mut issued = HashSet::with_capacity(pairs.len());
        let assignments = pairs
            .into_iter()
            .map(|(giver, receiver)| Assignment {
                giver: giver.clone(),
                receiver: receiver.clone(),
                code: fresh_code(&mut issued, rng),
            })
            .collect();
        return Ok(assignments);
    }

    Err(DrawError::AssignmentExhausted {
        attempts: max_attempts,
    })
}

fn validate_pool(participants: &[Participant]) -> Result<(), DrawError> {
    if participants.len() < MIN_PARTICIPANTS {
        return Err(DrawError::TooFewParticipants {
            required: MIN_PARTICIPANTS,
            found: participants.len(),
        });
    }

    let mut seen = HashSet::with_capacity(participants.len());
    for p in participants {
        if !seen.insert(p) {
            return Err(DrawError::DuplicateName(p.name().to_string()));
        }
    }
    Ok(())
}

// One pass over the givers in order, each drawing from the shrinking pool.
// Returns None when the last giver is left with only themselves.
fn try_pairing<'a, R: Rng + ?Sized>(
    participants: &'a [Participant],
    rng: &mut R,
) -> Option<Vec<(&'a Participant, &'a Participant)>> {
    let mut pool: Vec<&Participant> = participants.iter().collect();
    let mut pairs = Vec::with_capacity(participants.len());

    for giver in participants {
        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, candidate)| **candidate != giver)
            .map(|(idx, _)| idx)
            .collect();
        let idx = *candidates.choose(rng)?;
        pairs.push((giver, pool.swap_remove(idx)));
    }

    Some(pairs)
}

// Codes inside one drawing never repeat; collisions with older drawings are
// not checked.
fn fresh_code<R: Rng + ?Sized>(issued: &mut HashSet<RedemptionCode>, rng: &mut R) -> RedemptionCode {
    loop {
        let code = RedemptionCode::generate(rng);
        if issued.insert(code.clone()) {
            return code;
        }
    }
}
