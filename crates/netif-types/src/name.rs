//! Validated interface names.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Maximum interface name length in bytes, including nothing else; the
/// traditional IFNAMSIZ minus the terminating NUL.
pub const IF_NAME_SIZE: usize = 15;

/// A validated interface name.
///
/// Names are non-empty, at most [`IF_NAME_SIZE`] bytes, printable
/// ASCII, and contain no whitespace or `/`.
///
/// # Examples
///
/// ```
/// use netif_types::InterfaceName;
///
/// let name: InterfaceName = "eth0".parse().unwrap();
/// assert_eq!(name.as_str(), "eth0");
/// assert!("".parse::<InterfaceName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Creates a name from a base and a unit number, e.g. `tap` + 3
    /// gives `tap3`.
    pub fn with_unit(base: &str, unit: u32) -> Result<Self, ParseError> {
        format!("{base}{unit}").parse()
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ParseError> {
        if s.is_empty() {
            return Err(ParseError::InvalidInterfaceName(s.to_string()));
        }
        if s.len() > IF_NAME_SIZE {
            return Err(ParseError::InterfaceNameTooLong(s.to_string()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_graphic() && c != '/' && c != ':')
        {
            return Err(ParseError::InvalidInterfaceName(s.to_string()));
        }
        Ok(())
    }
}

impl FromStr for InterfaceName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)?;
        Ok(InterfaceName(s.to_string()))
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(InterfaceName(s))
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> String {
        name.0
    }
}

impl Deref for InterfaceName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for InterfaceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for InterfaceName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_names() {
        assert!("eth0".parse::<InterfaceName>().is_ok());
        assert!("em0.100".parse::<InterfaceName>().is_ok());
        assert!("lo".parse::<InterfaceName>().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(
            "".parse::<InterfaceName>(),
            Err(ParseError::InvalidInterfaceName(String::new()))
        );
    }

    #[test]
    fn test_too_long_rejected() {
        let long = "a".repeat(IF_NAME_SIZE + 1);
        assert!(matches!(
            long.parse::<InterfaceName>(),
            Err(ParseError::InterfaceNameTooLong(_))
        ));
        let max = "a".repeat(IF_NAME_SIZE);
        assert!(max.parse::<InterfaceName>().is_ok());
    }

    #[test]
    fn test_bad_characters_rejected() {
        assert!("eth 0".parse::<InterfaceName>().is_err());
        assert!("eth/0".parse::<InterfaceName>().is_err());
        assert!("eth:0".parse::<InterfaceName>().is_err());
    }

    #[test]
    fn test_with_unit() {
        let name = InterfaceName::with_unit("tap", 3).unwrap();
        assert_eq!(name, "tap3");
    }
}
