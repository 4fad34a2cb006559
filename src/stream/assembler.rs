//! Re-chunks raw provider fragments into word units. Providers cut their
//! output at arbitrary byte boundaries, so a word may arrive split across
//! several fragments; the unfinished tail is carried in a buffer until the
//! next fragment (or the end of the stream) completes it.

/// Feeds one fragment into the buffer and returns the words that are now
/// complete plus the new remainder.
///
/// The combined input is split on whitespace with the delimiters captured,
/// so word boundaries are never lost. Every piece except the last is
/// complete: each non-blank one is emitted with a single trailing space.
/// The last piece may still be growing and becomes the new remainder.
pub fn feed(buffer: &str, fragment: &str) -> (Vec<String>, String) {
    let combined = format!("{}{}", buffer, fragment);
    let pieces = split_keep_whitespace(&combined);

    if pieces.len() <= 1 {
        return (Vec::new(), combined);
    }

    let last = pieces.len() - 1;
    let words = pieces[..last]
        .iter()
        .filter(|piece| !piece.trim().is_empty())
        .map(|piece| format!("{} ", piece))
        .collect();

    (words, pieces[last].clone())
}

/// Final flush once the stream is exhausted. A blank remainder is dropped;
/// anything else goes out verbatim, without the synthetic trailing space.
pub fn flush(buffer: &str) -> Option<String> {
    if buffer.trim().is_empty() {
        None
    } else {
        Some(buffer.to_string())
    }
}

/// Splits into alternating non-whitespace/whitespace runs, keeping the
/// delimiters. Always starts and ends with a (possibly empty)
/// non-whitespace piece, so a trailing whitespace run yields an empty
/// remainder rather than swallowing the delimiter.
fn split_keep_whitespace(input: &str) -> Vec<String> {
    let mut pieces = vec![String::new()];
    let mut in_whitespace = false;

    for ch in input.chars() {
        if ch.is_whitespace() != in_whitespace {
            in_whitespace = !in_whitespace;
            pieces.push(String::new());
        }
        match pieces.last_mut() {
            Some(piece) => piece.push(ch),
            None => unreachable!("pieces starts non-empty"),
        }
    }

    if in_whitespace {
        pieces.push(String::new());
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(fragments: &[&str]) -> (Vec<String>, String) {
        let mut buffer = String::new();
        let mut words = Vec::new();
        for fragment in fragments {
            let (emitted, rest) = feed(&buffer, fragment);
            words.extend(emitted);
            buffer = rest;
        }
        (words, buffer)
    }

    #[test]
    fn incomplete_word_stays_in_buffer() {
        let (words, rest) = feed("", "Hel");
        assert!(words.is_empty());
        assert_eq!(rest, "Hel");
    }

    #[test]
    fn completed_word_is_emitted_with_trailing_space() {
        let (words, rest) = feed("Hel", "lo wor");
        assert_eq!(words, vec!["Hello ".to_string()]);
        assert_eq!(rest, "wor");
    }

    #[test]
    fn words_split_across_chunks() {
        let (words, rest) = feed_all(&["Hel", "lo wor", "ld!"]);
        assert_eq!(words, vec!["Hello ".to_string()]);
        assert_eq!(rest, "world!");
        assert_eq!(flush(&rest), Some("world!".to_string()));
    }

    #[test]
    fn trailing_whitespace_completes_the_word() {
        let (words, rest) = feed("", "done ");
        assert_eq!(words, vec!["done ".to_string()]);
        assert_eq!(rest, "");
    }

    #[test]
    fn leading_whitespace_is_not_a_word() {
        let (words, rest) = feed("", "  lead");
        assert!(words.is_empty());
        assert_eq!(rest, "lead");
    }

    #[test]
    fn multiple_words_in_one_fragment() {
        let (words, rest) = feed("", "one two three fo");
        assert_eq!(
            words,
            vec!["one ".to_string(), "two ".to_string(), "three ".to_string()]
        );
        assert_eq!(rest, "fo");
    }

    #[test]
    fn newlines_count_as_delimiters() {
        let (words, rest) = feed("", "\n - Calling tool: search\n");
        assert_eq!(
            words,
            vec![
                "- ".to_string(),
                "Calling ".to_string(),
                "tool: ".to_string(),
                "search ".to_string()
            ]
        );
        assert_eq!(rest, "");
    }

    #[test]
    fn blank_remainder_is_not_flushed() {
        assert_eq!(flush(""), None);
        assert_eq!(flush("   \n"), None);
    }

    #[test]
    fn unicode_words_survive_splitting() {
        let (words, rest) = feed_all(&["héll", "o wörld grü", "ß"]);
        assert_eq!(words, vec!["héllo ".to_string(), "wörld ".to_string()]);
        assert_eq!(rest, "grüß");
    }

    #[test]
    fn no_characters_dropped_or_duplicated() {
        let fragments = ["The q", "uick  brow", "n\nfox ", " jumps", "!"];
        let (words, rest) = feed_all(&fragments);

        let mut rebuilt: String = words.concat();
        if let Some(tail) = flush(&rest) {
            rebuilt.push_str(&tail);
        }

        let original: String = fragments.concat();
        let strip_ws = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&original));
    }
}
