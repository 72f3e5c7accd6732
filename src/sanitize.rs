//! Text sanitization for catalog output.
//!
//! Two independent concerns live here:
//!
//! - [`Sanitizer::normalize`] cleans free text (summaries, descriptions,
//!   category and facet labels) before it enters the document model.
//! - [`strip_control`], [`escape_xml`] and [`repair_html`] run at render
//!   time and guarantee the emitted XML stays well-formed.
//!
//! HTML handling is a tokenizer over tags, entities and text, not a parser.
//! It keeps the structure it recognizes and leaves everything else as text.

use regex::Regex;
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Comments, start/end/empty tags and character references.
static HTML_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!--.*?-->|</?[A-Za-z][A-Za-z0-9]*(?:\s[^<>]*)?/?>|&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);",
    )
    .expect("HTML token pattern is valid")
});

static SHARED: LazyLock<Arc<Sanitizer>> = LazyLock::new(|| Arc::new(Sanitizer::default()));

/// Elements that never have content and are always emitted self-closed.
const VOID_ELEMENTS: &[&str] = &["br", "hr", "img"];

/// Punctuation kept by the allow-list filter.
const ALLOWED_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '-', '(', ')', '\'', '"', '/', '%', '+', '«', '»', '–', '—', '№',
];

/// Diacritic to base letter table, used when decomposition yields nothing.
const DIACRITIC_TABLE: &[(char, &str)] = &[
    ('À', "A"), ('Á', "A"), ('Â', "A"), ('Ã', "A"), ('Ä', "A"), ('Å', "A"),
    ('à', "a"), ('á', "a"), ('â', "a"), ('ã', "a"), ('ä', "a"), ('å', "a"),
    ('Æ', "AE"), ('æ', "ae"), ('Ç', "C"), ('ç', "c"), ('Č', "C"), ('č', "c"),
    ('Ð', "D"), ('ð', "d"), ('Đ', "D"), ('đ', "d"),
    ('È', "E"), ('É', "E"), ('Ê', "E"), ('Ë', "E"),
    ('è', "e"), ('é', "e"), ('ê', "e"), ('ë', "e"), ('Ě', "E"), ('ě', "e"),
    ('Ì', "I"), ('Í', "I"), ('Î', "I"), ('Ï', "I"),
    ('ì', "i"), ('í', "i"), ('î', "i"), ('ï', "i"), ('ı', "i"),
    ('Ł', "L"), ('ł', "l"), ('Ñ', "N"), ('ñ', "n"),
    ('Ò', "O"), ('Ó', "O"), ('Ô', "O"), ('Õ', "O"), ('Ö', "O"), ('Ø', "O"),
    ('ò', "o"), ('ó', "o"), ('ô', "o"), ('õ', "o"), ('ö', "o"), ('ø', "o"),
    ('Œ', "OE"), ('œ', "oe"), ('Š', "S"), ('š', "s"), ('ß', "ss"),
    ('Þ', "Th"), ('þ', "th"),
    ('Ù', "U"), ('Ú', "U"), ('Û', "U"), ('Ü', "U"),
    ('ù', "u"), ('ú', "u"), ('û', "u"), ('ü', "u"),
    ('Ý', "Y"), ('ý', "y"), ('ÿ', "y"), ('Ž', "Z"), ('ž', "z"),
];

/// Strategy for removing diacritics from Latin letters.
///
/// Implementations must leave non-Latin scripts untouched: Cyrillic letters
/// such as `ё` and `й` are distinct letters, not accented ones.
pub trait Transliterator: Send + Sync + std::fmt::Debug {
    /// Replace accented Latin letters with their base letters.
    fn strip_diacritics(&self, text: &str) -> String;
}

/// Canonical decomposition of Latin letters, falling back to
/// [`DiacriticTable`] for letters without a decomposition (`ø`, `ß`, `ł`).
#[derive(Debug, Default, Clone, Copy)]
pub struct LatinFold;

/// Static diacritic table only.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiacriticTable;

/// Leaves text unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

fn is_latin_extended(c: char) -> bool {
    matches!(c, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}')
}

fn table_lookup(c: char) -> Option<&'static str> {
    DIACRITIC_TABLE
        .iter()
        .find(|(accented, _)| *accented == c)
        .map(|(_, base)| *base)
}

impl Transliterator for LatinFold {
    fn strip_diacritics(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if !is_latin_extended(c) {
                out.push(c);
                continue;
            }

            let decomposed: String = std::iter::once(c)
                .nfd()
                .filter(|d| !is_combining_mark(*d))
                .collect();

            match table_lookup(c) {
                Some(base) if decomposed.chars().eq(std::iter::once(c)) => out.push_str(base),
                _ => out.push_str(&decomposed),
            }
        }
        out
    }
}

impl Transliterator for DiacriticTable {
    fn strip_diacritics(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match table_lookup(c) {
                Some(base) => out.push_str(base),
                None => out.push(c),
            }
        }
        out
    }
}

impl Transliterator for Passthrough {
    fn strip_diacritics(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Free-text normalizer applied to summaries, content and labels.
///
/// Pipeline: HTML-aware split (optional), NFC composition, diacritic
/// stripping, allow-list filter (Cyrillic, ASCII letters and digits,
/// whitespace, a small punctuation set), whitespace collapse and trim.
/// The result is a fixed point: normalizing it again returns it unchanged.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    transliterator: Arc<dyn Transliterator>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(LatinFold)
    }
}

impl Sanitizer {
    /// Create a sanitizer with a specific transliteration strategy.
    pub fn new(transliterator: impl Transliterator + 'static) -> Self {
        Self {
            transliterator: Arc::new(transliterator),
        }
    }

    /// Process-wide default sanitizer.
    pub fn shared() -> Arc<Sanitizer> {
        Arc::clone(&SHARED)
    }

    /// Normalize text. With `preserve_html`, tags and character references
    /// are kept verbatim and only the text between them is normalized.
    pub fn normalize(&self, text: &str, preserve_html: bool) -> String {
        if !preserve_html {
            return collapse_whitespace(&self.normalize_fragment(text))
                .trim()
                .to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut pending = String::new();

        for token in tokenize(text) {
            match token {
                Token::Text(t) => pending.push_str(t),
                // Comments are dropped; the text around them merges.
                Token::Comment(_) => {}
                Token::Tag(raw) | Token::Entity(raw) => {
                    self.flush_text(&mut pending, &mut out);
                    out.push_str(raw);
                }
            }
        }
        self.flush_text(&mut pending, &mut out);

        out.trim().to_string()
    }

    fn flush_text(&self, pending: &mut String, out: &mut String) {
        if !pending.is_empty() {
            out.push_str(&collapse_whitespace(&self.normalize_fragment(pending)));
            pending.clear();
        }
    }

    fn normalize_fragment(&self, text: &str) -> String {
        let composed: String = text.nfc().collect();
        self.transliterator
            .strip_diacritics(&composed)
            .chars()
            .filter(|c| is_allowed(*c))
            .collect()
    }
}

/// Normalize text with the shared default sanitizer.
pub fn normalize(text: &str, preserve_html: bool) -> String {
    SHARED.normalize(text, preserve_html)
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || ('\u{0400}'..='\u{04FF}').contains(&c)
        || c.is_whitespace()
        || ALLOWED_PUNCTUATION.contains(&c)
}

/// Replace every whitespace run with a single space. Does not trim.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn is_stripped_control(c: char) -> bool {
    matches!(
        c,
        '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}

/// Remove characters that are not allowed in XML 1.0: everything below 0x20
/// except tab, line feed and carriage return, plus the noncharacters
/// U+FFFE and U+FFFF.
pub fn strip_control(text: &str) -> Cow<'_, str> {
    if text.chars().any(is_stripped_control) {
        Cow::Owned(text.chars().filter(|c| !is_stripped_control(*c)).collect())
    } else {
        Cow::Borrowed(text)
    }
}

/// Strip control characters, then escape for XML text or attribute content.
pub fn escape_xml(text: &str) -> String {
    let clean = strip_control(text);
    quick_xml::escape::escape(&*clean).into_owned()
}

/// Best-effort tag balancing for HTML-typed content.
///
/// Void elements (`br`, `hr`, `img`) are rewritten self-closed, opening tags
/// that are never closed are dropped, and closing tags without an opener are
/// dropped. Text, character references and properly nested markup pass
/// through unchanged. This is not an HTML parser: attribute values containing
/// `>` or implicitly closed elements such as `<p>` without `</p>` are handled
/// by dropping the unmatched tag rather than inferring structure.
pub fn repair_html(html: &str) -> String {
    let mut pieces: Vec<Option<Cow<'_, str>>> = Vec::new();
    let mut open: Vec<(String, usize)> = Vec::new();

    for token in tokenize(html) {
        match token {
            Token::Text(t) | Token::Entity(t) => pieces.push(Some(Cow::Borrowed(t))),
            Token::Comment(_) => {}
            Token::Tag(raw) => {
                let tag = TagInfo::parse(raw);

                if VOID_ELEMENTS.contains(&tag.name.as_str()) {
                    if !tag.closing {
                        pieces.push(Some(self_close(raw)));
                    }
                } else if tag.self_closing {
                    pieces.push(Some(Cow::Borrowed(raw)));
                } else if !tag.closing {
                    open.push((tag.name, pieces.len()));
                    pieces.push(Some(Cow::Borrowed(raw)));
                } else if let Some(pos) = open.iter().rposition(|(name, _)| *name == tag.name) {
                    for (_, index) in open.drain(pos + 1..) {
                        pieces[index] = None;
                    }
                    open.pop();
                    pieces.push(Some(Cow::Borrowed(raw)));
                }
            }
        }
    }

    for (_, index) in open {
        pieces[index] = None;
    }

    pieces.into_iter().flatten().collect()
}

fn self_close(raw: &str) -> Cow<'_, str> {
    if raw.ends_with("/>") {
        return Cow::Borrowed(raw);
    }
    let inner = raw[..raw.len() - 1].trim_end();
    Cow::Owned(format!("{}/>", inner))
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Tag(&'a str),
    Entity(&'a str),
    Comment(&'a str),
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;

    for m in HTML_TOKEN.find_iter(html) {
        if m.start() > last {
            tokens.push(Token::Text(&html[last..m.start()]));
        }
        let raw = m.as_str();
        let token = if raw.starts_with("<!--") {
            Token::Comment(raw)
        } else if raw.starts_with('&') {
            Token::Entity(raw)
        } else {
            Token::Tag(raw)
        };
        tokens.push(token);
        last = m.end();
    }

    if last < html.len() {
        tokens.push(Token::Text(&html[last..]));
    }

    tokens
}

struct TagInfo {
    name: String,
    closing: bool,
    self_closing: bool,
}

impl TagInfo {
    fn parse(raw: &str) -> Self {
        let closing = raw.starts_with("</");
        let body = raw.trim_start_matches('<').trim_start_matches('/');
        let name = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        Self {
            name,
            closing,
            self_closing: raw.ends_with("/>"),
        }
    }
}
