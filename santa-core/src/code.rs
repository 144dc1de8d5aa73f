use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::DrawError;

pub const CODE_PREFIX: &str = "REGALO-";
pub const CODE_LEN: usize = 6;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Single-use credential that reveals one giver's receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RedemptionCode(String);

impl RedemptionCode {
    /// `REGALO-` plus six characters from `[A-Z0-9]`. Uniqueness against
    /// codes already in the store is not checked.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(format!("{CODE_PREFIX}{suffix}"))
    }

    /// Normalizes user input (trim, uppercase). The format is not checked
    /// here: a malformed code simply will not be found.
    pub fn normalize(input: &str) -> Result<Self, DrawError> {
        let code = input.trim().to_uppercase();
        if code.is_empty() {
            return Err(DrawError::EmptyCode);
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_code(&self.0)
    }

    pub fn is_well_formed(&self) -> bool {
        self.0
            .strip_prefix(CODE_PREFIX)
            .map(|rest| rest.len() == CODE_LEN && rest.bytes().all(|b| CODE_ALPHABET.contains(&b)))
            .unwrap_or(false)
    }
}

/// Hides all but the last two characters after the `REGALO-` prefix, for
/// logging codes that may still be redeemable.
pub fn mask_code(raw: &str) -> String {
    let (prefix, rest) = match raw.strip_prefix(CODE_PREFIX) {
        Some(rest) => (CODE_PREFIX, rest),
        None => ("", raw),
    };
    let chars: Vec<char> = rest.chars().collect();
    let visible = if chars.len() > 2 { 2 } else { 0 };
    let hidden = chars.len() - visible;
    let tail: String = chars[hidden..].iter().collect();
    format!("{prefix}{}{tail}", "*".repeat(hidden))
}

impl fmt::Display for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
