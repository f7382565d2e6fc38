//! Identifier and run correlation id.

use crate::errors::TickerflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const MAX_IDENTIFIER_LEN: usize = 64;

/// The opaque key a pipeline run operates on (a ticker).
///
/// Any trimmed, non-empty line without control characters is accepted, so
/// symbols like `BRK/B` survive a round trip through the backlog file. Use
/// [`Identifier::file_stem`] wherever the key becomes part of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

/// Lexical form of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierForm {
    /// Alphabetic exchange symbol (e.g. `AAPL`).
    ExchangeSymbol,
    /// Numeric domestic code (e.g. `005930`).
    DomesticCode,
}

impl fmt::Display for IdentifierForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExchangeSymbol => write!(f, "exchange_symbol"),
            Self::DomesticCode => write!(f, "domestic_code"),
        }
    }
}

impl Identifier {
    /// Parses and validates an identifier.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, TickerflowError> {
        let raw = value.as_ref();
        let trimmed = raw.trim();

        let reject = |reason: &str| TickerflowError::InvalidIdentifier {
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(reject("empty"));
        }
        if trimmed.len() > MAX_IDENTIFIER_LEN {
            return Err(reject("too long"));
        }
        if let Some(c) = trimmed.chars().find(|c| c.is_control()) {
            return Err(reject(&format!("unexpected character {c:?}")));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier with every character outside `[A-Za-z0-9._^-]`
    /// replaced by `_`, for use in file names.
    ///
    /// A leading `.` is replaced too, so the stem never names a hidden file
    /// or a parent directory.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .enumerate()
            .map(|(i, c)| match c {
                '.' if i == 0 => '_',
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^') => c,
                _ => '_',
            })
            .collect()
    }

    /// Returns the lexical form of the identifier.
    #[must_use]
    pub fn form(&self) -> IdentifierForm {
        if self.0.chars().all(|c| c.is_ascii_digit()) {
            IdentifierForm::DomesticCode
        } else {
            IdentifierForm::ExchangeSymbol
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = TickerflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = TickerflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Correlation token minted once per run (at claim time in backlog mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Mints a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the first hyphen-separated segment, used in file names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_forms() {
        assert_eq!(Identifier::parse("AAPL").unwrap().form(), IdentifierForm::ExchangeSymbol);
        assert_eq!(Identifier::parse("005930").unwrap().form(), IdentifierForm::DomesticCode);
        assert_eq!(Identifier::parse("BRK.B").unwrap().form(), IdentifierForm::ExchangeSymbol);
    }

    #[test]
    fn test_identifier_trims_whitespace() {
        let id = Identifier::parse("  MSFT \n").unwrap();
        assert_eq!(id.as_str(), "MSFT");
    }

    #[test]
    fn test_identifier_rejects_bad_input() {
        assert!(Identifier::parse("").is_err());
        assert!(Identifier::parse("   ").is_err());
        assert!(Identifier::parse("A\nB").is_err());
        assert!(Identifier::parse("A\rB").is_err());
        assert!(Identifier::parse("A\u{0}B").is_err());
        assert!(Identifier::parse("X".repeat(65)).is_err());
    }

    #[test]
    fn test_identifier_accepts_free_form_symbols() {
        for raw in ["BRK/B", "BRK B", "^GSPC", "7203.T", "X".repeat(64).as_str()] {
            assert_eq!(Identifier::parse(raw).unwrap().as_str(), raw);
        }
        assert_eq!(Identifier::parse("BRK B").unwrap().form(), IdentifierForm::ExchangeSymbol);
    }

    #[test]
    fn test_file_stem_replaces_path_characters() {
        let stem = |raw: &str| Identifier::parse(raw).unwrap().file_stem();
        assert_eq!(stem("AAPL"), "AAPL");
        assert_eq!(stem("BRK.B"), "BRK.B");
        assert_eq!(stem("BRK/B"), "BRK_B");
        assert_eq!(stem("BRK B"), "BRK_B");
        assert_eq!(stem("../etc"), "_._etc");
        assert_eq!(stem("a\\b:c"), "a_b_c");
    }

    #[test]
    fn test_identifier_serde_validates() {
        let id: Identifier = serde_json::from_str(r#""BRK/B""#).unwrap();
        assert_eq!(id.as_str(), "BRK/B");
        assert!(serde_json::from_str::<Identifier>(r#""""#).is_err());
        assert!(serde_json::from_str::<Identifier>(r#""A\nB""#).is_err());
    }

    #[test]
    fn test_run_id_short_and_parse() {
        let run_id = RunId::new();
        assert_eq!(run_id.short().len(), 8);
        assert!(run_id.to_string().starts_with(&run_id.short()));

        let parsed: RunId = run_id.to_string().parse().unwrap();
        assert_eq!(parsed, run_id);
    }
}
