//! Rule-based sentence tokenizer for spoken replies.
//!
//! A boundary is a run of `.`, `!` or `?` (plus any closing quotes or
//! brackets) followed by whitespace, where the next visible character is not
//! lowercase. A period ending a common abbreviation is not a boundary.
//!
//! Every boundary except the one after the final sentence depends only on
//! text already received, so for a growing string the tokenization of all
//! but the last sentence never changes.

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "approx",
];

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '}' | '”' | '’')
}

fn ends_with_abbreviation(before_dot: &str) -> bool {
    let Some(word) = before_dot.split_whitespace().last() else {
        return false;
    };
    let word = word
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    ABBREVIATIONS.contains(&word.as_str())
}

/// Split `text` into trimmed sentences. The trailing fragment, if any, is
/// returned as the last sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !is_terminal(c) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && (is_terminal(chars[j].1) || is_closer(chars[j].1)) {
            j += 1;
        }
        if j == chars.len() || !chars[j].1.is_whitespace() {
            i = j;
            continue;
        }

        let mut k = j;
        while k < chars.len() && chars[k].1.is_whitespace() {
            k += 1;
        }
        let continues_lowercase = k < chars.len() && chars[k].1.is_lowercase();
        let abbreviation = c == '.' && ends_with_abbreviation(&text[start..pos]);

        if !continues_lowercase && !abbreviation {
            push_trimmed(&mut sentences, &text[start..chars[j].0]);
            start = chars[j].0;
        }
        i = k;
    }

    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_owned());
    }
}
