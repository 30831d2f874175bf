//! Identifier grammar: recognise student registration numbers (ERNs) in cell text.
//!
//! Grammar (with the default pattern):
//!
//! ```text
//! identifier := PREFIX DIGIT{16}        PREFIX = "MU"
//! ```
//!
//! Two entry points with different strictness:
//!
//! * [`IdentifierValidator::is_valid`] - strip every non-alphanumeric
//!   character, then the *whole* remainder must be exactly prefix + digits.
//!   The prefix is case-sensitive unless the pattern says otherwise.
//! * [`IdentifierValidator::extract`] - find the first embedded identifier in
//!   noisy text. The prefix matches in any case and punctuation between the
//!   prefix and the digits (or inside the digit run) is skipped. A digit run
//!   longer than the pattern is rejected, never truncated. The result is
//!   returned with the canonical prefix spelling.

use crate::error::GazetteError;
use crate::model::Identifier;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum digit run after the prefix for a fragment to count as a near miss.
const NEAR_MISS_DIGITS: usize = 8;

/// Shape of a student identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierPattern {
    /// Alphabetic prefix in its canonical spelling.
    pub prefix: String,
    /// Exact number of digits after the prefix.
    pub digits: usize,
    /// Whether [`IdentifierValidator::is_valid`] compares the prefix case-sensitively.
    pub case_sensitive: bool,
}

impl Default for IdentifierPattern {
    fn default() -> Self {
        Self::new("MU", 16)
    }
}

impl IdentifierPattern {
    pub fn new(prefix: impl Into<String>, digits: usize) -> Self {
        Self {
            prefix: prefix.into(),
            digits,
            case_sensitive: true,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

static DEFAULT_VALIDATOR: Lazy<IdentifierValidator> =
    Lazy::new(|| IdentifierValidator::new(&IdentifierPattern::default()).unwrap());

/// Compiled form of an [`IdentifierPattern`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IdentifierValidator {
    pattern: IdentifierPattern,
    strict: Regex,
    scan: Regex,
    near_miss: Regex,
}

impl Default for IdentifierValidator {
    fn default() -> Self {
        DEFAULT_VALIDATOR.clone()
    }
}

impl IdentifierValidator {
    /// Compile a pattern. Fails on an empty or non-alphabetic prefix or a
    /// digit count outside 1–64.
    pub fn new(pattern: &IdentifierPattern) -> Result<Self, GazetteError> {
        if pattern.prefix.is_empty() || !pattern.prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GazetteError::InvalidConfig(format!(
                "Identifier prefix must be ASCII letters, got '{}'",
                pattern.prefix
            )));
        }
        if pattern.digits == 0 || pattern.digits > 64 {
            return Err(GazetteError::InvalidConfig(format!(
                "Identifier digit count must be 1–64, got {}",
                pattern.digits
            )));
        }

        // ASCII-only case folding: `(?i)K` would also match the Kelvin sign.
        let prefix = format!("(?-u:{})", regex::escape(&pattern.prefix));
        let n = pattern.digits;
        let case = if pattern.case_sensitive { "" } else { "(?i)" };
        let compile = |src: String| {
            Regex::new(&src).map_err(|e| GazetteError::InvalidConfig(format!("identifier regex: {e}")))
        };

        Ok(Self {
            pattern: pattern.clone(),
            strict: compile(format!(r"^{case}{prefix}[0-9]{{{n}}}$"))?,
            // Punctuation (not whitespace) may sit inside the digit run.
            scan: compile(format!(
                r"(?i){prefix}[^0-9A-Za-z]*([0-9](?:[^\sA-Za-z0-9]*[0-9]){{{}}})",
                n - 1
            ))?,
            near_miss: compile(format!(r"(?i){prefix}[0-9]{{{NEAR_MISS_DIGITS},}}"))?,
        })
    }

    pub fn pattern(&self) -> &IdentifierPattern {
        &self.pattern
    }

    /// Strict check: after stripping non-alphanumerics, is `text` exactly one identifier?
    pub fn is_valid(&self, text: &str) -> bool {
        self.strict.is_match(&compact(text))
    }

    /// Find the first embedded identifier in `text`.
    pub fn extract(&self, text: &str) -> Option<Identifier> {
        let whole = compact(text);
        if self.strict.is_match(&whole) || self.loose_whole_match(&whole) {
            return Some(self.canonical(self.digit_suffix(&whole)));
        }

        for caps in self.scan.captures_iter(text) {
            let (Some(all), Some(digits)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let longer_run = text[all.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit());
            if longer_run {
                continue;
            }
            let digits: String = digits.as_str().chars().filter(char::is_ascii_digit).collect();
            return Some(self.canonical(&digits));
        }
        None
    }

    /// Every distinct identifier embedded in `text`, in order of appearance.
    pub fn extract_all(&self, text: &str) -> Vec<Identifier> {
        let mut found: Vec<Identifier> = Vec::new();
        let whole = compact(text);
        if self.strict.is_match(&whole) || self.loose_whole_match(&whole) {
            found.push(self.canonical(self.digit_suffix(&whole)));
            return found;
        }
        for caps in self.scan.captures_iter(text) {
            let (Some(all), Some(digits)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if text[all.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
            {
                continue;
            }
            let digits: String = digits.as_str().chars().filter(char::is_ascii_digit).collect();
            let id = self.canonical(&digits);
            if !found.contains(&id) {
                found.push(id);
            }
        }
        found
    }

    /// Looks like an identifier (prefix + a long digit run) yet cannot be extracted.
    pub fn resembles(&self, text: &str) -> bool {
        self.extract(text).is_none() && self.near_miss.is_match(&compact(text))
    }

    /// Case-insensitive whole-fragment match, used by `extract` only.
    fn loose_whole_match(&self, whole: &str) -> bool {
        let p = &self.pattern;
        whole.len() == p.prefix.len() + p.digits
            && whole.is_char_boundary(p.prefix.len())
            && whole[..p.prefix.len()].eq_ignore_ascii_case(&p.prefix)
            && whole[p.prefix.len()..].bytes().all(|b| b.is_ascii_digit())
    }

    /// The trailing digit run of a whole-fragment match (all ASCII).
    fn digit_suffix<'a>(&self, whole: &'a str) -> &'a str {
        &whole[whole.len().saturating_sub(self.pattern.digits)..]
    }

    fn canonical(&self, digits: &str) -> Identifier {
        Identifier::new_unchecked(format!("{}{}", self.pattern.prefix, digits))
    }
}

/// Drop every character that is not alphanumeric.
fn compact(text: &str) -> String {
    text.chars().filter(|c| c.is_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v() -> IdentifierValidator {
        IdentifierValidator::default()
    }

    #[test]
    fn valid_exact() {
        assert!(v().is_valid("MU0000000000000001"));
        assert!(v().is_valid(" MU-0000-0000-0000-0001 "));
        assert!(v().is_valid("MU 0000 0000 0000 0001"));
    }

    #[test]
    fn invalid_shapes() {
        assert!(!v().is_valid(""));
        assert!(!v().is_valid("MU000000000000001")); // 15 digits
        assert!(!v().is_valid("MU00000000000000012")); // 17 digits
        assert!(!v().is_valid("MX0000000000000001"));
        assert!(!v().is_valid("0000000000000001"));
        assert!(!v().is_valid("MU0000000000000001 John"));
    }

    #[test]
    fn prefix_case_sensitive_by_default() {
        assert!(!v().is_valid("mu0000000000000001"));
        let loose = IdentifierValidator::new(&IdentifierPattern::default().case_insensitive()).unwrap();
        assert!(loose.is_valid("mu0000000000000001"));
    }

    #[test]
    fn non_ascii_case_variants_of_prefix_are_rejected() {
        let kt = IdentifierValidator::new(&IdentifierPattern::new("KT", 16).case_insensitive()).unwrap();
        // U+212A KELVIN SIGN folds to `k` under Unicode case rules.
        let kelvin = "\u{212A}T0000000000000001";
        assert!(!kt.is_valid(kelvin));
        assert!(kt.extract(kelvin).is_none());
        assert!(kt.extract_all(kelvin).is_empty());
        assert!(!kt.resembles(kelvin));
        assert_eq!(
            kt.extract("kt0000000000000001").unwrap().as_str(),
            "KT0000000000000001"
        );
    }

    #[test]
    fn extract_normalises_case_and_punctuation() {
        let id = v().extract("  mu-0000000000000002 ").unwrap();
        assert_eq!(id.as_str(), "MU0000000000000002");
    }

    #[test]
    fn extract_embedded() {
        let id = v().extract("ERN: MU0000000000000003 John Doe").unwrap();
        assert_eq!(id.as_str(), "MU0000000000000003");

        let id = v().extract("(MU0000000000000004)").unwrap();
        assert_eq!(id.as_str(), "MU0000000000000004");
    }

    #[test]
    fn extract_does_not_glue_neighbouring_numbers() {
        let id = v().extract("MU0000000000000005 10411").unwrap();
        assert_eq!(id.as_str(), "MU0000000000000005");
    }

    #[test]
    fn extract_rejects_longer_runs() {
        assert!(v().extract("MU00000000000000056").is_none());
        assert!(v().extract("MU00000000").is_none());
        assert!(v().extract("seat 1234567").is_none());
    }

    #[test]
    fn extract_first_of_many() {
        let id = v().extract("MU0000000000000007 / MU0000000000000008").unwrap();
        assert_eq!(id.as_str(), "MU0000000000000007");
        let all = v().extract_all("MU0000000000000007 / MU0000000000000008 MU0000000000000007");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].as_str(), "MU0000000000000008");
    }

    #[test]
    fn valid_implies_extractable() {
        for t in ["MU 0000 0000 0000 0009", "MU.0000000000000009", "MU0000000000000009"] {
            assert!(v().is_valid(t));
            assert_eq!(v().extract(t).unwrap().as_str(), "MU0000000000000009");
        }
    }

    #[test]
    fn near_misses() {
        assert!(v().resembles("MU000000000000001")); // 15 digits
        assert!(v().resembles("MU00000000000000012"));
        assert!(!v().resembles("MU0000000000000001"));
        assert!(!v().resembles("Mumbai University"));
    }

    #[test]
    fn custom_pattern() {
        let p = IdentifierPattern::new("PU", 10);
        let v = IdentifierValidator::new(&p).unwrap();
        assert!(v.is_valid("PU1234567890"));
        assert!(!v.is_valid("MU1234567890"));
        assert_eq!(v.extract("x pu-1234567890 y").unwrap().as_str(), "PU1234567890");
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(IdentifierValidator::new(&IdentifierPattern::new("", 16)).is_err());
        assert!(IdentifierValidator::new(&IdentifierPattern::new("M-", 16)).is_err());
        assert!(IdentifierValidator::new(&IdentifierPattern::new("MU", 0)).is_err());
    }
}
