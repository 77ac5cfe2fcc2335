//! Random human-readable names used as seed document content.

use rand::{Rng, seq::SliceRandom};

const ONSETS: &[&str] = &[
    "b", "br", "c", "ch", "d", "dr", "f", "g", "gr", "h", "j", "k", "l", "m", "n", "p", "r", "s",
    "sh", "st", "t", "th", "v", "w", "z",
];
const VOWELS: &[&str] = &["a", "e", "i", "o", "u", "ai", "ea", "ie", "ou"];
const CODAS: &[&str] = &["", "", "", "n", "r", "l", "s", "th", "m", "x"];

fn word<R: Rng + ?Sized>(rng: &mut R, syllables: usize) -> String {
    let mut word = String::new();
    for _ in 0..syllables {
        word.push_str(ONSETS.choose(rng).copied().unwrap_or("b"));
        word.push_str(VOWELS.choose(rng).copied().unwrap_or("a"));
    }
    word.push_str(CODAS.choose(rng).copied().unwrap_or(""));
    capitalize(&word)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Returns a pronounceable "First Last" name.
pub fn full_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let first = rng.gen_range(1..=2);
    let last = rng.gen_range(2..=3);
    format!("{} {}", word(rng, first), word(rng, last))
}
