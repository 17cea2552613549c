//! Identifier case transforms used by the case-transform alias specs.
//!
//! Flag keys in the wild are usually kebab- or dot-cased; codebases refer to
//! them as camelCase constants, SCREAMING_SNAKE env names, and so on. Each
//! transform splits the key into words and rejoins them in the target shape.

/// Split an identifier into words on `-`, `_`, `.`, whitespace, and
/// lower-to-upper camel boundaries. Acronym runs stay together until a
/// trailing lowercase letter starts a new word (`HTTPServer` → `HTTP`,
/// `Server`).
fn split_words(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut words = Vec::new();
    let mut cur = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '-' | '_' | '.') || c.is_whitespace() {
            if !cur.is_empty() {
                words.push(std::mem::take(&mut cur));
            }
            continue;
        }
        if c.is_uppercase() && !cur.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut cur));
            }
        }
        cur.push(c);
    }
    if !cur.is_empty() {
        words.push(cur);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

fn join_lower(s: &str, sep: &str) -> String {
    split_words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(sep)
}

/// `my-flag.name` → `myFlagName`
pub fn to_camel(s: &str) -> String {
    let words = split_words(s);
    let mut out = String::new();
    for (i, w) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(&w.to_lowercase());
        } else {
            out.push_str(&capitalize(w));
        }
    }
    out
}

/// `my-flag.name` → `MyFlagName`
pub fn to_pascal(s: &str) -> String {
    split_words(s).iter().map(|w| capitalize(w)).collect()
}

/// `my-flag.name` → `my_flag_name`
pub fn to_snake(s: &str) -> String {
    join_lower(s, "_")
}

/// `my-flag.name` → `MY_FLAG_NAME`
pub fn to_screaming_snake(s: &str) -> String {
    to_snake(s).to_uppercase()
}

/// `my.flag` → `my-flag`
pub fn to_kebab(s: &str) -> String {
    join_lower(s, "-")
}

/// `my-flag` → `my.flag`
pub fn to_dotted(s: &str) -> String {
    join_lower(s, ".")
}
