use rand::distributions::Distribution;
use rand::{thread_rng, Rng};

use crate::prelude::*;

/// Letters and digits without the visually ambiguous ones.
#[derive(Debug)]
pub struct DistinctAlpha;

/// Lowercase letters and digits, for identifiers that end up in usernames.
#[derive(Debug)]
pub struct LowerAlnum;

pub fn password_from_random() -> String {
    thread_rng()
        .sample_iter(&DistinctAlpha)
        .take(GENERATED_PASSWORD_LEN)
        .collect()
}

pub fn token_from_random(len: usize) -> String {
    thread_rng().sample_iter(&DistinctAlpha).take(len).collect()
}

pub fn lower_id_from_random(len: usize) -> String {
    thread_rng().sample_iter(&LowerAlnum).take(len).collect()
}

/// Generate a random token that `exists` reports as unused. Every failed attempt widens the
/// token, and after `TOKEN_MAX_ATTEMPTS` the token space is considered exhausted.
pub fn unique_token<F>(mut exists: F) -> Result<String, OperationError>
where
    F: FnMut(&str) -> Result<bool, OperationError>,
{
    for attempt in 0..TOKEN_MAX_ATTEMPTS {
        let token = token_from_random(TOKEN_LEN + attempt * TOKEN_LEN_STEP);
        if !exists(&token)? {
            return Ok(token);
        }
        admin_warn!(%attempt, "Random token collision, retrying");
    }
    admin_error!("Unable to generate a unique token");
    Err(OperationError::ID0001TokenSpaceExhausted)
}

impl Distribution<char> for DistinctAlpha {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> char {
        const RANGE: u32 = 55;
        const GEN_ASCII_STR_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ\
                abcdefghjkpqrstuvwxyz\
                0123456789";
        loop {
            let var = rng.next_u32() >> (32 - 6);
            if var < RANGE {
                return GEN_ASCII_STR_CHARSET[var as usize] as char;
            }
        }
    }
}

impl Distribution<char> for LowerAlnum {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> char {
        const RANGE: u32 = 36;
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        loop {
            let var = rng.next_u32() >> (32 - 6);
            if var < RANGE {
                return CHARSET[var as usize] as char;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utils_password_from_random() {
        let a = password_from_random();
        let b = password_from_random();
        assert_eq!(a.len(), GENERATED_PASSWORD_LEN);
        assert_ne!(a, b);
        assert!(!a.contains(['O', 'I', 'l', 'i', 'o']));
    }

    #[test]
    fn test_utils_lower_id() {
        let id = lower_id_from_random(USERNAME_RANDOM_LEN);
        assert_eq!(id.len(), USERNAME_RANDOM_LEN);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_utils_unique_token_widens() {
        let mut seen = Vec::new();
        let token = unique_token(|t| {
            seen.push(t.len());
            Ok(seen.len() < 3)
        })
        .expect("token");
        assert_eq!(token.len(), TOKEN_LEN + 2 * TOKEN_LEN_STEP);
        assert_eq!(seen, vec![TOKEN_LEN, TOKEN_LEN + TOKEN_LEN_STEP, TOKEN_LEN + 2 * TOKEN_LEN_STEP]);
    }

    #[test]
    fn test_utils_unique_token_exhausted() {
        assert_eq!(
            unique_token(|_| Ok(true)),
            Err(OperationError::ID0001TokenSpaceExhausted)
        );
        assert_eq!(
            unique_token(|_| Err(OperationError::SqliteError)),
            Err(OperationError::SqliteError)
        );
    }
}
