//! Repairs token-level stutter in assembled reply text.
//!
//! Streaming backends occasionally emit a token twice ("HelloHello",
//! "ECHECHO") or leak their end-of-stream marker into the text. Each rule
//! below removes one of those artifacts; [`normalize`] applies them until the
//! text stops changing, which makes it idempotent.

use std::ops::Range;
use std::sync::LazyLock;

use regex_lite::Regex;

/// A trailing `[DONE]`/`DONE` marker, optionally preceded by the word
/// `message`. The bare form is matched upper-case only so prose ending in
/// "done" is left alone.
static TRAILING_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:(?i:\bmessage)\s*)?(?:(?i:\[done\])|\bDONE)\s*$").ok()
});

const CAPITALIZED_MAX_TAIL: usize = 30;
const ACRONYM_MAX_LEN: usize = 6;
const STUTTER_MIN_UNIT: usize = 3;

type Pass = fn(&str) -> String;

const PASSES: [Pass; 6] = [
    strip_trailing_markers,
    split_doubled_capitalized_words,
    collapse_repeated_words,
    collapse_repeated_word_pairs,
    collapse_repeated_acronym_units,
    collapse_spaced_acronyms,
];

/// Returns `raw` with duplicate tokens, leaked markers and trailing
/// whitespace removed.
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_once(raw);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_once(raw: &str) -> String {
    let mut text = PASSES.iter().fold(raw.to_string(), |text, pass| pass(&text));
    text.truncate(text.trim_end().len());
    text
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Byte ranges of maximal ASCII word runs (`[A-Za-z0-9_]+`). An apostrophe
/// between word bytes stays inside the run, so "that's" is one word.
fn word_ranges(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let continues_word = |index: usize| {
        let next_is_word = bytes.get(index + 1).copied().is_some_and(is_word_byte);
        is_word_byte(bytes[index]) || (bytes[index] == b'\'' && next_is_word)
    };

    let mut ranges = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        if !is_word_byte(bytes[index]) {
            index += 1;
            continue;
        }
        let start = index;
        while index < bytes.len() && continues_word(index) {
            index += 1;
        }
        ranges.push(start..index);
    }
    ranges
}

fn is_whitespace_gap(text: &str, gap: Range<usize>) -> bool {
    let between = &text[gap];
    !between.is_empty() && between.chars().all(char::is_whitespace)
}

fn is_capitalized_word(word: &str) -> bool {
    let bytes = word.as_bytes();
    match bytes.split_first() {
        Some((first, tail)) => {
            first.is_ascii_uppercase()
                && (1..=CAPITALIZED_MAX_TAIL).contains(&tail.len())
                && tail.iter().all(u8::is_ascii_lowercase)
        }
        None => false,
    }
}

fn is_acronym(word: &str) -> bool {
    !word.is_empty() && word.bytes().all(|byte| byte.is_ascii_uppercase())
}

fn strip_trailing_markers(text: &str) -> String {
    match TRAILING_MARKER.as_ref() {
        Some(marker) => marker.replace(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// "HelloHello" becomes "Hello".
fn split_doubled_capitalized_words(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in word_ranges(text) {
        let word = &text[range.clone()];
        if word.len() % 2 != 0 {
            continue;
        }
        let (head, tail) = word.split_at(word.len() / 2);
        if head == tail && is_capitalized_word(head) {
            output.push_str(&text[cursor..range.start]);
            output.push_str(head);
            cursor = range.end;
        }
    }
    output.push_str(&text[cursor..]);
    output
}

/// "the the the" becomes "the", including a capitalized word doubled at a
/// sentence start ("Done. Sure Sure").
fn collapse_repeated_words(text: &str) -> String {
    let words = word_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut index = 0;
    while index < words.len() {
        let first = &words[index];
        let mut next = index + 1;
        while next < words.len()
            && is_whitespace_gap(text, words[next - 1].end..words[next].start)
            && text[words[next].clone()] == text[first.clone()]
        {
            next += 1;
        }
        if next > index + 1 {
            output.push_str(&text[cursor..first.end]);
            cursor = words[next - 1].end;
        }
        index = next;
    }
    output.push_str(&text[cursor..]);
    output
}

/// "going to going to" becomes "going to".
fn collapse_repeated_word_pairs(text: &str) -> String {
    let words = word_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut index = 0;
    while index + 3 < words.len() {
        let phrase = &words[index..index + 4];
        let spaced = phrase
            .windows(2)
            .all(|pair| is_whitespace_gap(text, pair[0].end..pair[1].start));
        let repeated = text[phrase[0].clone()] == text[phrase[2].clone()]
            && text[phrase[1].clone()] == text[phrase[3].clone()]
            && text[phrase[0].clone()] != text[phrase[1].clone()];
        if spaced && repeated {
            output.push_str(&text[cursor..phrase[1].end]);
            cursor = phrase[3].end;
            index += 4;
        } else {
            index += 1;
        }
    }
    output.push_str(&text[cursor..]);
    output
}

/// An upper-case token made of one repeated unit ("DGDG", "HAHAHA") keeps a
/// single unit. A unit of three or more letters emitted once more before the
/// one-letter rest of its word loses the extra copy, so "ECHECHO" becomes "ECHO".
fn collapse_repeated_acronym_units(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in word_ranges(text) {
        let word = &text[range.clone()];
        if !is_acronym(word) {
            continue;
        }
        if let Some(collapsed) = collapse_leading_unit(word) {
            output.push_str(&text[cursor..range.start]);
            output.push_str(&collapsed);
            cursor = range.end;
        }
    }
    output.push_str(&text[cursor..]);
    output
}

fn collapse_leading_unit(word: &str) -> Option<String> {
    let bytes = word.as_bytes();
    (2..=bytes.len() / 2).find_map(|unit| {
        let head = &bytes[..unit];
        let mut run_end = unit;
        while run_end + unit <= bytes.len() && &bytes[run_end..run_end + unit] == head {
            run_end += unit;
        }
        let repeats = run_end / unit;
        let rest = bytes.len() - run_end;

        let whole_word = repeats >= 2 && rest == 0;
        let stutter = repeats == 2 && unit >= STUTTER_MIN_UNIT && rest == 1;
        (whole_word || stutter).then(|| format!("{}{}", &word[..unit], &word[run_end..]))
    })
}

/// "AI Ai" becomes "AI": an acronym followed by the same letters in another
/// case.
fn collapse_spaced_acronyms(text: &str) -> String {
    let words = word_ranges(text);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for pair in words.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        if first.start < cursor {
            continue;
        }
        let acronym = &text[first.clone()];
        if (2..=ACRONYM_MAX_LEN).contains(&acronym.len())
            && is_acronym(acronym)
            && is_whitespace_gap(text, first.end..second.start)
            && text[second.clone()].eq_ignore_ascii_case(acronym)
        {
            output.push_str(&text[cursor..first.end]);
            cursor = second.end;
        }
    }
    output.push_str(&text[cursor..]);
    output
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn doubled_capitalized_words_are_split() {
        assert_eq!(normalize("HelloHello, world"), "Hello, world");
        assert_eq!(normalize("HiHi there"), "Hi there");
    }

    #[test]
    fn repeated_words_collapse() {
        assert_eq!(normalize("the the the cat"), "the cat");
        assert_eq!(normalize("Sure. Sure thing"), "Sure. Sure thing");
        assert_eq!(normalize("Sure Sure thing"), "Sure thing");
        assert_eq!(normalize("I am going to going to help"), "I am going to help");
    }

    #[test]
    fn acronym_stutter_is_repaired() {
        assert_eq!(normalize("ECHECHO test"), "ECHO test");
        assert_eq!(normalize("DGDG ECHO"), "DG ECHO");
        assert_eq!(normalize("HAHAHA"), "HA");
        assert_eq!(normalize("Use the API api to call"), "Use the API to call");
    }

    #[test]
    fn real_words_with_repeated_letters_survive() {
        assert_eq!(normalize("COCOA"), "COCOA");
        assert_eq!(normalize("BANANA"), "BANANA");
        assert_eq!(normalize("COCOA beans and ECHECHO"), "COCOA beans and ECHO");
    }

    #[test]
    fn trailing_markers_are_removed() {
        assert_eq!(normalize("All set [DONE]"), "All set");
        assert_eq!(normalize("All set message [done]  "), "All set");
        assert_eq!(normalize("Finished DONE"), "Finished");
        assert_eq!(normalize("I am done"), "I am done");
    }

    #[test]
    fn ordinary_text_is_untouched() {
        for text in [
            "The theory of the thesis",
            "I had a good day.",
            "NASA and ESA agree",
            "MAMMAL",
            "Bye bye",
            "that that's fine",
            "Çà et là, naïve café",
            "",
        ] {
            assert_eq!(normalize(text), text);
        }
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        assert_eq!(normalize("answer \n\n"), "answer");
        assert_eq!(normalize("  leading stays"), "  leading stays");
    }

    #[test]
    fn normalization_is_idempotent() {
        const VOCABULARY: [&str; 14] = [
            "Hello", "HelloHello", "the", "the", "ECHO", "ECHECHO", "AI", "ai", "DONE",
            "[DONE]", "going", "to", ".", "\n",
        ];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let length = rng.gen_range(0..24);
            let text = (0..length)
                .filter_map(|_| VOCABULARY.choose(&mut rng).copied())
                .collect::<Vec<_>>()
                .join(" ");
            let once = normalize(&text);
            assert_eq!(normalize(&once), once, "input: {text:?}");
        }
    }
}
