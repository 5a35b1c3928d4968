//! Deterministic GraphQL identifier generation
//!
//! Every synthesized name (object types, query fields, enum names and
//! symbols) goes through these helpers so that identical metadata always
//! yields identical names.

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex is valid"));
static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex is valid"));

/// Split a label, class or column name into lowercase words
fn words(input: &str) -> Vec<String> {
    let spaced = CAMEL_BOUNDARY.replace_all(input, "$1 $2");
    WORD_SPLIT
        .split(&spaced)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Prefix names that would start with a digit
fn guard_leading_digit(name: String) -> String {
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{name}")
    } else {
        name
    }
}

/// `news article` -> `NewsArticle`
pub fn pascal_case(input: &str) -> String {
    guard_leading_digit(words(input).iter().map(|w| capitalize(w)).collect())
}

/// `sys_language_uid` -> `sysLanguageUid`
pub fn camel_case(input: &str) -> String {
    let words = words(input);
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    guard_leading_digit(out)
}

/// `Blue sky` -> `BLUE_SKY`
pub fn screaming_snake_case(input: &str) -> String {
    guard_leading_digit(
        words(input)
            .iter()
            .map(|w| w.to_uppercase())
            .collect::<Vec<_>>()
            .join("_"),
    )
}

/// English pluralization of the last word of a PascalCase or camelCase name
pub fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let lower = name.to_lowercase();
    if lower.ends_with("ss")
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{name}es");
    }
    if lower.ends_with('s') {
        return name.to_string();
    }
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last().map(|c| c.to_ascii_lowercase());
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{stem}ies");
        }
    }
    format!("{name}s")
}

/// Short name of a model class: `Vendor\News\Domain\Model\NewsItem` -> `NewsItem`
pub fn class_short_name(class: &str) -> &str {
    class.rsplit(['\\', '.', ':']).next().unwrap_or(class)
}

/// Valid GraphQL name, or `None` when nothing usable remains
pub fn non_empty(name: String) -> Option<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__");
    valid.then_some(name)
}

/// Derive unique enum symbols from item labels, in item order.
///
/// Symbols that sanitize to nothing fall back to `VALUE_<value>`; repeated
/// symbols get a `_2`, `_3`, ... suffix.
pub fn enum_symbols<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    let mut taken: Vec<String> = Vec::new();
    for (label, value) in items {
        let mut base = screaming_snake_case(label);
        if base.is_empty() {
            base = screaming_snake_case(&format!("value {value}"));
        }
        // GraphQL reserves these as literals
        if matches!(base.as_str(), "TRUE" | "FALSE" | "NULL") {
            base = format!("{base}_");
        }
        let mut symbol = base.clone();
        let mut n = 2;
        while taken.contains(&symbol) {
            symbol = format!("{base}_{n}");
            n += 1;
        }
        taken.push(symbol);
    }
    taken
}
