//! Free-text cleaning: HTML removal, mojibake repair, whitespace and
//! comma collapsing.

use regex::Regex;

/// Double-encoded UTF-8 sequences (UTF-8 bytes read back as Windows-1252)
/// and the characters they stand for.
const MOJIBAKE: &[(&str, &str)] = &[
    ("\u{e2}\u{201a}\u{ac}", "€"),
    ("\u{c3}\u{a9}", "é"),
    ("\u{c3}\u{a8}", "è"),
    ("\u{c3}\u{aa}", "ê"),
    ("\u{c3}\u{ab}", "ë"),
    ("\u{c3}\u{a1}", "á"),
    ("\u{c3}\u{a0}", "à"),
    ("\u{c3}\u{a2}", "â"),
    ("\u{c3}\u{a4}", "ä"),
    ("\u{c3}\u{a3}", "ã"),
    ("\u{c3}\u{ad}", "í"),
    ("\u{c3}\u{ae}", "î"),
    ("\u{c3}\u{af}", "ï"),
    ("\u{c3}\u{b3}", "ó"),
    ("\u{c3}\u{b4}", "ô"),
    ("\u{c3}\u{b6}", "ö"),
    ("\u{c3}\u{b5}", "õ"),
    ("\u{c3}\u{ba}", "ú"),
    ("\u{c3}\u{b9}", "ù"),
    ("\u{c3}\u{bb}", "û"),
    ("\u{c3}\u{bc}", "ü"),
    ("\u{c3}\u{b1}", "ñ"),
    ("\u{c3}\u{a7}", "ç"),
    ("\u{c3}\u{178}", "ß"),
    ("\u{c3}\u{2030}", "É"),
    ("\u{c3}\u{2018}", "Ñ"),
    ("\u{c3}\u{201c}", "Ó"),
    ("\u{c3}\u{161}", "Ú"),
    ("\u{c3}\u{2021}", "Ç"),
    ("\u{c3}\u{2013}", "Ö"),
    ("\u{c3}\u{153}", "Ü"),
];

/// Delimiter that replaces `<br>` tags and joins array items
pub const LIST_DELIMITER: &str = ", ";

/// Compiled patterns for [`TextCleaner::clean`]
#[derive(Debug, Clone)]
pub struct TextCleaner {
    line_break: Regex,
    tag: Regex,
    whitespace: Regex,
    commas: Regex,
}

impl TextCleaner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            line_break: Regex::new(r"(?i)<\s*br\s*/?\s*>")?,
            tag: Regex::new(r"<[^>]*>")?,
            whitespace: Regex::new(r"\s+")?,
            commas: Regex::new(r"\s*,[\s,]*")?,
        })
    }

    /// Clean one text value. Applying it to its own output is a no-op.
    pub fn clean(&self, raw: &str) -> String {
        let text = self.line_break.replace_all(raw, LIST_DELIMITER);
        let text = self.tag.replace_all(&text, "");
        let text = repair_mojibake(&text);
        let text = self.whitespace.replace_all(&text, " ");
        let text = self.commas.replace_all(&text, LIST_DELIMITER);
        text.trim_matches(|c: char| c == ',' || c.is_whitespace())
            .to_string()
    }
}

/// Replace known mojibake sequences until none are left.
///
/// Repeats because one repair can expose another (`Ã¢‚¬` → `â‚¬` → `€`).
/// Every substitution shortens the text, so the loop terminates.
pub fn repair_mojibake(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        if !MOJIBAKE.iter().any(|(broken, _)| text.contains(broken)) {
            return text;
        }
        for (broken, fixed) in MOJIBAKE {
            if text.contains(broken) {
                text = text.replace(broken, fixed);
            }
        }
    }
}
