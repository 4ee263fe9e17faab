//! Short random identifiers for users and rooms.

use rand::{rng, Rng};

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated ids.
pub const ID_LENGTH: usize = 6;

/// Generate a 6-character id over `[a-z0-9]`.
///
/// Not guaranteed unique; room creation retries on collision.
pub fn generate() -> String {
    let mut rng = rng();
    (0..ID_LENGTH)
        .map(|_| char::from(CHARSET[rng.random_range(0..CHARSET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        for _ in 0..100 {
            let id = generate();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
