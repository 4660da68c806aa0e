//! Random order number generation.

use chrono::{DateTime, Utc};
use cinema_booking_core::environment::OrderNumberGenerator;
use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 8;

/// Generates `ORD-<yyyymmdd>-<8 uppercase alphanumerics>` from the thread RNG.
///
/// 36^8 suffixes per day make collisions rare; the store's unique index catches
/// the rest and the caller sees a retryable error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOrderNumbers;

impl OrderNumberGenerator for RandomOrderNumbers {
    fn generate(&self, at: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
            .collect();
        format!("ORD-{}-{suffix}", at.format("%Y%m%d"))
    }
}

/// Whether `value` has the order number shape.
#[must_use]
pub fn is_well_formed(value: &str) -> bool {
    let mut parts = value.splitn(3, '-');
    let (Some("ORD"), Some(date), Some(suffix)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    date.len() == 8
        && date.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b))
}
