//! Rule-based sentence segmentation.
//!
//! Boundaries come from Unicode sentence segmentation (UAX #29) over
//! whitespace-normalized text. Segments ending in a common abbreviation are
//! merged into the following segment, since UAX #29 breaks after "Dr." and
//! friends whenever the next word is capitalized.

use unicode_segmentation::UnicodeSegmentation;

const ABBREVIATIONS: &[&str] = &[
    "dr.", "mr.", "mrs.", "ms.", "prof.", "st.", "vs.", "etc.", "fig.", "figs.", "eq.", "no.",
    "vol.", "al.", "e.g.", "i.e.", "cf.", "approx.", "sec.", "ch.",
];

/// Split a section's text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sentences: Vec<String> = Vec::new();
    let mut carry = String::new();

    for segment in normalized.split_sentence_bounds() {
        carry.push_str(segment);
        let trimmed = carry.trim();
        if trimmed.is_empty() {
            carry.clear();
            continue;
        }
        if ends_with_abbreviation(trimmed) {
            continue;
        }
        sentences.push(trimmed.to_string());
        carry.clear();
    }

    let rest = carry.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

fn ends_with_abbreviation(segment: &str) -> bool {
    let Some(last_word) = segment.split_whitespace().last() else {
        return false;
    };
    let last_word = last_word.to_lowercase();
    ABBREVIATIONS.iter().any(|abbr| last_word == *abbr)
}
