use rand::rngs::OsRng;
use rand::Rng;

use crate::config::ROOM_CODE_LEN;

/// Alphabet room codes are drawn from
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of candidate room codes.
///
/// The room table asks for candidates while holding its lock and retries on
/// collision, so implementations must be cheap and must not block.
pub trait CodeSource: Send + Sync {
    fn candidate(&self) -> String;
}

/// Draws codes from the operating system CSPRNG so they can't be guessed
/// within a room's short lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn candidate(&self) -> String {
        (0..ROOM_CODE_LEN)
            .map(|_| CODE_ALPHABET[OsRng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Checks that a viewer-supplied code could have been produced by us
pub fn is_well_formed(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_code_shape() {
        for _ in 0..100 {
            let code = RandomCodes.candidate();
            assert_eq!(code.len(), 8);
            assert!(is_well_formed(&code), "bad code {}", code);
        }
    }

    #[test]
    fn test_random_codes_vary() {
        let codes: HashSet<String> = (0..50).map(|_| RandomCodes.candidate()).collect();
        assert!(codes.len() > 45);
    }

    #[test]
    fn test_is_well_formed() {
        assert!(is_well_formed("AB12CD34"));
        assert!(!is_well_formed("ab12cd34"));
        assert!(!is_well_formed("AB12CD3"));
        assert!(!is_well_formed("AB12-D34"));
        assert!(!is_well_formed(""));
    }
}
