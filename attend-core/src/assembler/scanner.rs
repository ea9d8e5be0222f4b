//! Incremental scanner over a streaming structured reply.
//!
//! The model answers with `{"outputs": {"<field>": ...}}`. Before the reply is
//! complete the scanner works out which field is populated and, when it is
//! the spoken field, decodes that JSON string as it grows so sentences can be
//! synthesized before the stream ends. Deltas may split tokens anywhere,
//! including inside escape sequences; the scanner simply waits for more text.

/// Field whose string value is spoken aloud.
pub const SPOKEN_FIELD: &str = "assistant_response";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanState {
    /// Not enough text yet to tell which field is populated.
    Unknown,
    /// Inside the spoken field's string value.
    InSpokenField,
    /// The spoken field's closing quote has been seen.
    FieldClosed,
    /// Another field (e.g. a mode switch) is populated; nothing to speak.
    OtherField(String),
}

#[derive(Debug, Clone)]
pub struct ShapeScanner {
    raw: String,
    state: ScanState,
    /// Byte offset into `raw` of the next undecoded spoken character.
    cursor: usize,
    spoken: String,
}

enum Peek {
    Incomplete,
    Mismatch,
    Field { name: String, value_start: Option<usize> },
}

enum Decoded {
    Char(char, usize),
    Close(usize),
    NeedMore,
}

impl ShapeScanner {
    pub fn new() -> Self {
        Self {
            raw: String::new(),
            state: ScanState::Unknown,
            cursor: 0,
            spoken: String::new(),
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Everything received so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decoded spoken text so far.
    pub fn spoken(&self) -> &str {
        &self.spoken
    }

    pub fn into_parts(self) -> (String, String) {
        (self.raw, self.spoken)
    }

    /// Append one delta and advance as far as the text allows.
    pub fn push(&mut self, delta: &str) -> &ScanState {
        self.raw.push_str(delta);

        if self.state == ScanState::Unknown {
            match peek_field(&self.raw) {
                Peek::Field {
                    name,
                    value_start: Some(start),
                } if name == SPOKEN_FIELD => {
                    self.state = ScanState::InSpokenField;
                    self.cursor = start;
                }
                Peek::Field { name, .. } if name != SPOKEN_FIELD => {
                    self.state = ScanState::OtherField(name);
                }
                Peek::Field { .. } | Peek::Incomplete | Peek::Mismatch => {}
            }
        }

        if self.state == ScanState::InSpokenField {
            self.decode_spoken();
        }
        &self.state
    }

    fn decode_spoken(&mut self) {
        loop {
            match decode_one(&self.raw[self.cursor..]) {
                Decoded::Char(c, used) => {
                    self.spoken.push(c);
                    self.cursor += used;
                }
                Decoded::Close(used) => {
                    self.cursor += used;
                    self.state = ScanState::FieldClosed;
                    return;
                }
                Decoded::NeedMore => return,
            }
        }
    }
}

impl Default for ShapeScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Match `"outputs" : { "<name>" : "` tolerating whitespace anywhere.
fn peek_field(raw: &str) -> Peek {
    let Some(key) = raw.find("\"outputs\"") else {
        return Peek::Incomplete;
    };
    let bytes = raw.as_bytes();
    let mut i = key + "\"outputs\"".len();

    for expected in [b':', b'{', b'"'] {
        i = skip_ws(bytes, i);
        match bytes.get(i) {
            None => return Peek::Incomplete,
            Some(&b) if b == expected => i += 1,
            Some(_) => return Peek::Mismatch,
        }
    }

    let name_start = i;
    let Some(name_len) = raw[name_start..].find('"') else {
        return Peek::Incomplete;
    };
    let name = raw[name_start..name_start + name_len].to_owned();
    i = name_start + name_len + 1;

    i = skip_ws(bytes, i);
    match bytes.get(i) {
        None => return Peek::Incomplete,
        Some(b':') => i += 1,
        Some(_) => return Peek::Mismatch,
    }
    i = skip_ws(bytes, i);
    let value_start = match bytes.get(i) {
        Some(b'"') => Some(i + 1),
        _ => None,
    };
    Peek::Field { name, value_start }
}

fn hex4(s: &str) -> Option<u32> {
    let digits = s.get(..4)?;
    u32::from_str_radix(digits, 16).ok()
}

/// Decode one JSON string character from the front of `rest`.
fn decode_one(rest: &str) -> Decoded {
    let mut chars = rest.chars();
    let Some(c) = chars.next() else {
        return Decoded::NeedMore;
    };
    match c {
        '"' => Decoded::Close(1),
        '\\' => {
            let Some(esc) = chars.next() else {
                return Decoded::NeedMore;
            };
            let simple = match esc {
                'n' => Some('\n'),
                't' => Some('\t'),
                'r' => Some('\r'),
                'b' => Some('\u{8}'),
                'f' => Some('\u{c}'),
                '/' => Some('/'),
                '"' => Some('"'),
                '\\' => Some('\\'),
                _ => None,
            };
            if let Some(ch) = simple {
                return Decoded::Char(ch, 2);
            }
            if esc != 'u' {
                // Unknown escape: keep the character, drop the backslash.
                return Decoded::Char(esc, 1 + esc.len_utf8());
            }
            decode_unicode_escape(rest)
        }
        other => Decoded::Char(other, other.len_utf8()),
    }
}

/// `rest` starts with `\u`.
fn decode_unicode_escape(rest: &str) -> Decoded {
    if rest.len() < 6 {
        return Decoded::NeedMore;
    }
    let Some(high) = hex4(&rest[2..]) else {
        return Decoded::Char(char::REPLACEMENT_CHARACTER, 2);
    };
    if !(0xD800..0xDC00).contains(&high) {
        let ch = char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER);
        return Decoded::Char(ch, 6);
    }

    // High surrogate: the low half must follow as another `\uXXXX`.
    let tail = &rest[6..];
    let could_be_low = tail
        .get(..tail.len().min(2))
        .is_some_and(|p| "\\u".starts_with(p));
    if tail.len() < 6 && could_be_low {
        return Decoded::NeedMore;
    }
    match (tail.starts_with("\\u"), hex4(tail.get(2..).unwrap_or(""))) {
        (true, Some(low)) if (0xDC00..0xE000).contains(&low) => {
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            let ch = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
            Decoded::Char(ch, 12)
        }
        _ => Decoded::Char(char::REPLACEMENT_CHARACTER, 6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(deltas: &[&str]) -> ShapeScanner {
        let mut scanner = ShapeScanner::new();
        for d in deltas {
            scanner.push(d);
        }
        scanner
    }

    #[test]
    fn spoken_field_is_decoded_as_it_grows() {
        let mut scanner = ShapeScanner::new();
        assert_eq!(scanner.push(r#"{"outputs":{"assistant_"#), &ScanState::Unknown);
        assert_eq!(scanner.push(r#"response":"Hi th"#), &ScanState::InSpokenField);
        assert_eq!(scanner.spoken(), "Hi th");
        assert_eq!(scanner.push(r#"ere."}}"#), &ScanState::FieldClosed);
        assert_eq!(scanner.spoken(), "Hi there.");
        assert_eq!(scanner.raw(), r#"{"outputs":{"assistant_response":"Hi there."}}"#);
    }

    #[test]
    fn tolerates_whitespace_between_tokens() {
        let scanner = feed(&["{\n  \"outputs\" :\n {\n \"assistant_response\" :  \"ok"]);
        assert_eq!(scanner.state(), &ScanState::InSpokenField);
        assert_eq!(scanner.spoken(), "ok");
    }

    #[test]
    fn other_field_is_recognised_once_its_name_is_complete() {
        let mut scanner = ShapeScanner::new();
        assert_eq!(scanner.push(r#"{"outputs": {"next_mo"#), &ScanState::Unknown);
        assert_eq!(
            scanner.push(r#"de": "perform_activity""#),
            &ScanState::OtherField("next_mode".into())
        );
        assert_eq!(scanner.spoken(), "");
    }

    #[test]
    fn escapes_split_across_deltas() {
        let scanner = feed(&[
            r#"{"outputs":{"assistant_response":"Say \"#,
            r#""hi\" \u00"#,
            r#"e9\n"#,
        ]);
        assert_eq!(scanner.spoken(), "Say \"hi\" é\n");
    }

    #[test]
    fn surrogate_pairs_wait_for_the_low_half() {
        let mut scanner = feed(&[r#"{"outputs":{"assistant_response":"\ud83d"#]);
        assert_eq!(scanner.spoken(), "");
        scanner.push(r#"\ude00!"#);
        assert_eq!(scanner.spoken(), "😀!");
    }

    #[test]
    fn non_json_text_stays_unknown() {
        let scanner = feed(&["Sure! Here is my answer."]);
        assert_eq!(scanner.state(), &ScanState::Unknown);
        assert_eq!(scanner.spoken(), "");
    }
}
