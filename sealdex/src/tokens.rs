//! Search token extraction for partial matching on sensitive values.
//!
//! Tokens are shipped to the search index in `<field>_parts` so that queries
//! like `gmail`, `4567` or `ali` find a record whose stored value is encrypted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Minimum length of a word or prefix emitted for generic text.
const MIN_TEXT_TOKEN: usize = 3;

/// Trailing digit windows emitted for phone numbers.
const PHONE_SUFFIXES: [usize; 3] = [4, 7, 10];

/// How a field's value should be broken into tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Email address: local part, domain, first domain label.
    Email,
    /// Phone number: digits and trailing digit windows.
    Phone,
    /// Anything else: words and leading prefixes.
    #[default]
    Text,
}

impl FieldKind {
    /// Infers the kind from a field name.
    ///
    /// `email` is an email field, any name containing `phone` is a phone
    /// field, everything else is text.
    #[must_use]
    pub fn for_field(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "email" {
            Self::Email
        } else if name.contains("phone") {
            Self::Phone
        } else {
            Self::Text
        }
    }
}

/// Derives the lowercase search tokens of `value`.
///
/// The full (trimmed, lowercased) value is always the first token. Tokens are
/// unique and keep first-occurrence order. An email value without `@` is
/// tokenized as text.
///
/// # Example
///
/// ```
/// use sealdex::tokens::{extract_tokens, FieldKind};
///
/// let tokens = extract_tokens("Alice@Mail.Example.com", FieldKind::Email);
/// assert_eq!(tokens, ["alice@mail.example.com", "alice", "mail.example.com", "mail"]);
/// ```
#[must_use]
pub fn extract_tokens(value: &str, kind: FieldKind) -> Vec<String> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Vec::new();
    }

    let mut tokens = TokenSet::default();
    tokens.push(value.clone());

    match kind {
        FieldKind::Email if value.contains('@') => email_tokens(&value, &mut tokens),
        FieldKind::Phone => phone_tokens(&value, &mut tokens),
        _ => text_tokens(&value, &mut tokens),
    }

    tokens.into_vec()
}

fn email_tokens(value: &str, tokens: &mut TokenSet) {
    let Some((local, domain)) = value.split_once('@') else {
        return;
    };
    tokens.push(local.to_string());
    tokens.push(domain.to_string());

    let mut labels = domain.split('.');
    if let (Some(first), Some(_)) = (labels.next(), labels.next()) {
        tokens.push(first.to_string());
    }
}

fn phone_tokens(value: &str, tokens: &mut TokenSet) {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return;
    }

    tokens.push(digits.clone());
    for window in PHONE_SUFFIXES {
        if digits.len() >= window {
            tokens.push(digits[digits.len() - window..].to_string());
        }
    }
}

fn text_tokens(value: &str, tokens: &mut TokenSet) {
    let words = value
        .split(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '.' | '@'))
        .filter(|word| word.chars().count() >= MIN_TEXT_TOKEN);
    for word in words {
        tokens.push(word.to_string());
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() > MIN_TEXT_TOKEN {
        for end in MIN_TEXT_TOKEN..=chars.len() {
            tokens.push(chars[..end].iter().collect());
        }
    }
}

/// Insertion-ordered set of tokens.
#[derive(Default)]
struct TokenSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl TokenSet {
    fn push(&mut self, token: String) {
        if token.is_empty() || self.seen.contains(&token) {
            return;
        }
        self.seen.insert(token.clone());
        self.ordered.push(token);
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn has(tokens: &[String], expected: &str) -> bool {
        tokens.iter().any(|t| t == expected)
    }

    #[test]
    fn test_email_tokens() {
        let tokens = extract_tokens("user.name@sub.example.com", FieldKind::Email);

        for expected in ["user.name@sub.example.com", "user.name", "sub.example.com", "sub"] {
            assert!(has(&tokens, expected), "missing {expected}: {tokens:?}");
        }
    }

    #[test]
    fn test_email_single_label_domain() {
        let tokens = extract_tokens("root@localhost", FieldKind::Email);
        assert_eq!(tokens, ["root@localhost", "root", "localhost"]);
    }

    #[test]
    fn test_email_without_at_is_text() {
        let tokens = extract_tokens("not-an-email", FieldKind::Email);
        assert!(has(&tokens, "not"));
        assert!(has(&tokens, "email"));
        assert!(has(&tokens, "not-"));
    }

    #[test]
    fn test_phone_tokens() {
        let tokens = extract_tokens("+1 (555) 123-4567", FieldKind::Phone);

        for expected in ["+1 (555) 123-4567", "15551234567", "4567", "1234567", "5551234567"] {
            assert!(has(&tokens, expected), "missing {expected}: {tokens:?}");
        }
    }

    #[test]
    fn test_short_phone_tokens() {
        let tokens = extract_tokens("12-34", FieldKind::Phone);
        assert_eq!(tokens, ["12-34", "1234"]);
    }

    #[test]
    fn test_phone_without_digits() {
        let tokens = extract_tokens("ask reception", FieldKind::Phone);
        assert_eq!(tokens, ["ask reception"]);
    }

    #[test]
    fn test_text_tokens() {
        let tokens = extract_tokens("Mary-Jane Watson", FieldKind::Text);

        assert!(has(&tokens, "mary"));
        assert!(has(&tokens, "jane"));
        assert!(has(&tokens, "watson"));
        assert!(has(&tokens, "mar"));
        assert!(has(&tokens, "mary-jane w"));
        assert!(!has(&tokens, "ma"));
    }

    #[test]
    fn test_text_drops_short_words() {
        let tokens = extract_tokens("Al Bo", FieldKind::Text);
        assert!(!has(&tokens, "al"));
        assert!(!has(&tokens, "bo"));
        assert!(has(&tokens, "al "));
        assert!(has(&tokens, "al bo"));
    }

    #[test]
    fn test_three_char_value_has_no_prefixes() {
        assert_eq!(extract_tokens("Bob", FieldKind::Text), ["bob"]);
    }

    #[test]
    fn test_multibyte_prefixes() {
        let tokens = extract_tokens("Zoë Ångström", FieldKind::Text);
        assert!(has(&tokens, "zoë"));
        assert!(has(&tokens, "ångström"));
        assert!(has(&tokens, "zoë å"));
    }

    #[test]
    fn test_blank_value() {
        assert!(extract_tokens("   ", FieldKind::Email).is_empty());
    }

    #[test]
    fn test_field_kind_inference() {
        assert_eq!(FieldKind::for_field("email"), FieldKind::Email);
        assert_eq!(FieldKind::for_field("mobile_phone"), FieldKind::Phone);
        assert_eq!(FieldKind::for_field("Phone"), FieldKind::Phone);
        assert_eq!(FieldKind::for_field("backup_email"), FieldKind::Text);
        assert_eq!(FieldKind::for_field("name"), FieldKind::Text);
    }

    proptest! {
        #[test]
        fn prop_tokens_unique_and_lowercase(value in "[a-zA-Z0-9@._ +()-]{0,40}") {
            for kind in [FieldKind::Email, FieldKind::Phone, FieldKind::Text] {
                let tokens = extract_tokens(&value, kind);
                let unique: HashSet<&String> = tokens.iter().collect();
                prop_assert_eq!(unique.len(), tokens.len());
                for token in &tokens {
                    prop_assert_eq!(token.to_lowercase(), token.clone());
                }
            }
        }
    }
}
