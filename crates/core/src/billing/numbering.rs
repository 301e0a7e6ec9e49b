//! Invoice number formatting.
//!
//! The authoritative sequence lives in the database (`facture_sequences`,
//! atomic upsert). When that path fails the orchestrator falls back to a
//! random token of the same shape, trading strict sequentiality for
//! availability. Both forms match `FAC-<year>-<4 alphanumeric chars>`.

use rand::Rng;

pub const PREFIXE_FACTURE: &str = "FAC";

const JETON_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const JETON_LONGUEUR: usize = 4;

/// `FAC-2026-0042` for sequence 42.
pub fn numero_sequentiel(annee: i32, sequence: i64) -> String {
    format!("{PREFIXE_FACTURE}-{annee}-{sequence:04}")
}

/// `FAC-2026-7QK3`-style fallback number.
pub fn numero_secours(annee: i32) -> String {
    let mut rng = rand::thread_rng();
    let jeton: String = (0..JETON_LONGUEUR)
        .map(|_| JETON_ALPHABET[rng.gen_range(0..JETON_ALPHABET.len())] as char)
        .collect();

    format!("{PREFIXE_FACTURE}-{annee}-{jeton}")
}

#[cfg(test)]
mod tests {
    use super::{numero_secours, numero_sequentiel};

    #[test]
    fn sequential_numbers_are_zero_padded() {
        assert_eq!(numero_sequentiel(2026, 7), "FAC-2026-0007");
        assert_eq!(numero_sequentiel(2026, 1234), "FAC-2026-1234");
    }

    #[test]
    fn sequences_past_four_digits_keep_growing() {
        assert_eq!(numero_sequentiel(2026, 10_001), "FAC-2026-10001");
    }

    #[test]
    fn fallback_numbers_match_the_documented_pattern() {
        for _ in 0..50 {
            let numero = numero_secours(2026);
            let parts: Vec<&str> = numero.split('-').collect();

            assert_eq!(parts.len(), 3);
            assert_eq!(parts[0], "FAC");
            assert_eq!(parts[1], "2026");
            assert_eq!(parts[2].len(), 4);
            assert!(parts[2].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }
}
