//! Syntax rules for candidate handles.

use std::fmt;

use thiserror::Error;

/// Longest handle the platform accepts.
pub const MAX_NAME_LENGTH: usize = 30;

/// The first rule a raw handle breaks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum InvalidName {
    /// Nothing left after trimming.
    #[error("handle cannot be empty")]
    Empty,
    /// More than [`MAX_NAME_LENGTH`] characters.
    #[error("handle `{name}` is too long (max {MAX_NAME_LENGTH} characters)")]
    TooLong {
        /// The offending handle.
        name: String,
    },
    /// A character outside ASCII letters, digits, `.` and `_`.
    #[error(
        "invalid character `{ch}` in handle `{name}`, \
         characters must be ASCII alphanumeric, `.`, or `_`"
    )]
    Char {
        /// The first disallowed character.
        ch: char,
        /// The offending handle.
        name: String,
    },
    /// Starts or ends with `.` or `_`.
    #[error("handle `{name}` cannot start or end with `.` or `_`")]
    Boundary {
        /// The offending handle.
        name: String,
    },
    /// Contains `..` or `__`.
    #[error("handle `{name}` cannot contain `..` or `__`")]
    DoubledSeparator {
        /// The offending handle.
        name: String,
    },
}

/// Check `name` exactly as given against the handle rules.
pub fn validate_name(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty);
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(InvalidName::TooLong { name: name.into() });
    }

    if let Some(ch) = name
        .chars()
        .find(|&ch| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
    {
        return Err(InvalidName::Char {
            ch,
            name: name.into(),
        });
    }

    let is_separator = |ch: char| ch == '.' || ch == '_';
    if name.starts_with(is_separator) || name.ends_with(is_separator) {
        return Err(InvalidName::Boundary { name: name.into() });
    }

    if name.contains("..") || name.contains("__") {
        return Err(InvalidName::DoubledSeparator { name: name.into() });
    }

    Ok(())
}

/// Whether `name` is a syntactically valid handle.
///
/// Pure and total: never touches the network and gives the same answer
/// for the same input.
///
/// ```
/// use handle_avail::validate::valid;
/// assert!(valid("ab"));
/// assert!(!valid("_ab"));
/// assert!(!valid("a..b"));
/// ```
#[must_use]
pub fn valid(name: &str) -> bool {
    validate_name(name).is_ok()
}

/// Trim and lower-case a raw handle.
#[must_use]
pub fn canon_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A canonical, validated handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateName(String);

impl CandidateName {
    /// Canonicalize `raw` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvalidName`] rule the canonical form breaks.
    pub fn parse(raw: &str) -> Result<Self, InvalidName> {
        let canonical = canon_name(raw);
        validate_name(&canonical)?;
        Ok(Self(canonical))
    }

    /// The canonical handle.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CandidateName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_handles() {
        assert!(valid("ab"));
        assert!(valid("a"));
        assert!(valid("john.doe_99"));
        assert!(valid(&"a".repeat(30)));
    }

    #[test]
    fn rejects_each_rule() {
        assert_eq!(validate_name(""), Err(InvalidName::Empty));
        assert!(matches!(
            validate_name(&"a".repeat(31)),
            Err(InvalidName::TooLong { .. })
        ));
        assert!(matches!(
            validate_name("foo-bar"),
            Err(InvalidName::Char { ch: '-', .. })
        ));
        assert!(matches!(
            validate_name("_ab"),
            Err(InvalidName::Boundary { .. })
        ));
        assert!(matches!(
            validate_name("ab."),
            Err(InvalidName::Boundary { .. })
        ));
        assert!(matches!(
            validate_name("a..b"),
            Err(InvalidName::DoubledSeparator { .. })
        ));
        assert!(matches!(
            validate_name("a__b"),
            Err(InvalidName::DoubledSeparator { .. })
        ));
    }

    #[test]
    fn mixed_separators_are_fine() {
        assert!(valid("a._b"));
        assert!(valid("a_.b"));
    }

    #[test]
    fn non_ascii_is_rejected() {
        assert!(!valid("café"));
        assert!(!valid("a b"));
    }

    #[test]
    fn parse_canonicalizes_before_validating() {
        let name = CandidateName::parse("  John.Doe \n").unwrap();
        assert_eq!(name.as_str(), "john.doe");
        assert_eq!(name.to_string(), "john.doe");
    }

    #[test]
    fn parse_rejects_blank() {
        assert_eq!(CandidateName::parse("   "), Err(InvalidName::Empty));
    }

    #[test]
    fn error_messages_name_the_rule() {
        let err = validate_name("a..b").unwrap_err();
        assert!(err.to_string().contains("`..` or `__`"));
        let err = validate_name("a+b").unwrap_err();
        assert!(err.to_string().contains("invalid character `+`"));
    }

    #[test]
    fn candidate_name_is_send_sync() {
        fn assert_normal<T: Sized + Send + Sync + Unpin>() {}
        assert_normal::<CandidateName>();
        assert_normal::<InvalidName>();
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        // alnum runs joined by single separators
        fn handle() -> impl Strategy<Value = String> {
            proptest::collection::vec(("[a-zA-Z0-9]{1,4}", "[._]"), 1..5).prop_map(|parts| {
                let mut out = String::new();
                for (i, (word, sep)) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(sep);
                    }
                    out.push_str(word);
                }
                out
            })
        }

        proptest! {
            #[test]
            fn grammar_handles_are_valid(name in handle()) {
                prop_assume!(name.len() <= MAX_NAME_LENGTH);
                prop_assert!(valid(&name));
            }

            #[test]
            fn leading_separator_is_invalid(name in handle(), sep in "[._]") {
                let name = format!("{sep}{name}");
                prop_assert!(!valid(&name));
            }

            #[test]
            fn trailing_separator_is_invalid(name in handle(), sep in "[._]") {
                let name = format!("{name}{sep}");
                prop_assert!(!valid(&name));
            }

            #[test]
            fn doubled_separator_is_invalid(a in "[a-z]{1,5}", b in "[a-z]{1,5}", sep in "(\\.\\.|__)") {
                let name = format!("{a}{sep}{b}");
                prop_assert!(!valid(&name));
            }

            #[test]
            fn overlong_is_invalid(name in "[a-z]{31,40}") {
                prop_assert!(!valid(&name));
            }

            #[test]
            fn disallowed_char_is_invalid(a in "[a-z]{1,5}", ch in "[-+ @#!]", b in "[a-z]{1,5}") {
                let name = format!("{a}{ch}{b}");
                prop_assert!(!valid(&name));
            }

            #[test]
            fn valid_is_deterministic(name in "\\PC{0,40}") {
                prop_assert_eq!(valid(&name), valid(&name));
            }

            #[test]
            fn canon_is_idempotent(name in "[a-zA-Z0-9._ ]{0,40}") {
                let once = canon_name(&name);
                prop_assert_eq!(canon_name(&once), once.clone());
            }
        }
    }
}
