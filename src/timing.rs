//! Randomized delays that make the typing cadence read like a fast human.
//!
//! Every function here is pure apart from the generator it is handed, so a
//! seeded `StdRng` reproduces a run exactly.

use rand::Rng;
use std::time::Duration;

pub const CHARACTER_BASE_MS: std::ops::Range<u64> = 80..150;
pub const CHARACTER_HESITATION_MS: std::ops::Range<u64> = 150..350;
pub const CHARACTER_HESITATION_PROBABILITY: f64 = 0.08;

pub const INTER_WORD_MS: std::ops::Range<u64> = 200..350;
pub const PRE_WORD_READING_MS: std::ops::Range<u64> = 100..200;

pub const MICRO_HESITATION_MS: std::ops::Range<u64> = 100..250;
pub const MICRO_HESITATION_PROBABILITY: f64 = 0.02;

/// Per-character pause, occasionally stretched by a longer hesitation.
pub fn character_delay<R: Rng>(rng: &mut R) -> Duration {
    let mut ms = rng.gen_range(CHARACTER_BASE_MS);
    if rng.gen_bool(CHARACTER_HESITATION_PROBABILITY) {
        ms += rng.gen_range(CHARACTER_HESITATION_MS);
    }
    Duration::from_millis(ms)
}

/// Pause after a word has been submitted.
pub fn inter_word_delay<R: Rng>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.gen_range(INTER_WORD_MS))
}

/// Time spent "reading" a freshly observed word before the first keystroke.
pub fn pre_word_reading_delay<R: Rng>(rng: &mut R) -> Duration {
    Duration::from_millis(rng.gen_range(PRE_WORD_READING_MS))
}

/// Extra pause stacked on top of `character_delay`, rolled once per character.
pub fn micro_hesitation<R: Rng>(rng: &mut R) -> Option<Duration> {
    rng.gen_bool(MICRO_HESITATION_PROBABILITY)
        .then(|| Duration::from_millis(rng.gen_range(MICRO_HESITATION_MS)))
}

/// Whether the character just typed should be swapped for a typo. A NaN
/// probability never fires.
pub fn inject_typo<R: Rng>(rng: &mut R, probability: f64) -> bool {
    let p = if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    };
    rng.gen_bool(p)
}

/// A random lowercase letter that differs from `intended`.
pub fn typo_letter<R: Rng>(rng: &mut R, intended: char) -> char {
    loop {
        let candidate = char::from(b'a' + rng.gen_range(0..26u8));
        if candidate != intended {
            return candidate;
        }
    }
}
