use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum length of user ids and session keys, in bytes.
pub const MAX_ID_LEN: usize = 64;

/// Number of practice parts in each year of the curriculum.
pub const MAX_PRACTICE_PARTS: u8 = 10;

/// The part every unlocked year starts at.
pub const FIRST_PRACTICE_PART: u8 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdError {
    #[error("user id cannot be empty")]
    EmptyUserId,
    #[error("user id is {len} chars, max is {max}", max = MAX_ID_LEN)]
    UserIdTooLong { len: usize },
    #[error("user id may only contain ASCII letters, digits, '-' and '_'")]
    UserIdInvalidChar,
    #[error("year numbering starts at 1")]
    YearZero,
    #[error("practice part {part} is outside 1..={max}", max = MAX_PRACTICE_PARTS)]
    PartOutOfRange { part: u8 },
    #[error("malformed practice key `{raw}`, expected `<year>-<part>`")]
    MalformedPracticeKey { raw: String },
    #[error("session key cannot be empty")]
    EmptySessionKey,
    #[error("session key is {len} chars, max is {max}", max = MAX_ID_LEN)]
    SessionKeyTooLong { len: usize },
    #[error("session key may only contain ASCII letters, digits, '-' and '_'")]
    SessionKeyInvalidChar,
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

// ─── UserId ────────────────────────────────────────────────────────────────────

/// Opaque identifier of a registered user.
///
/// User ids name rows in the remote store and files in the local cache, so
/// the accepted alphabet is restricted to characters safe in both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id from a raw string, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed value is empty, longer than
    /// [`MAX_ID_LEN`], or contains characters outside `[A-Za-z0-9_-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(IdError::UserIdTooLong { len: trimmed.len() });
        }
        if !trimmed.chars().all(is_id_char) {
            return Err(IdError::UserIdInvalidChar);
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(D::Error::custom)
    }
}

// ─── Year ──────────────────────────────────────────────────────────────────────

/// A curriculum year, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Year(u16);

impl Year {
    /// Creates a year, rejecting 0.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::YearZero`] for year 0.
    pub fn new(value: u16) -> Result<Self, IdError> {
        if value == 0 {
            return Err(IdError::YearZero);
        }
        Ok(Self(value))
    }

    /// The first year of the curriculum, unlocked for every user.
    #[must_use]
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the underlying year number.
    #[must_use]
    pub fn value(&self) -> u16 {
        self.0
    }

    /// The year after this one, saturating at the numeric ceiling.
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Year {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for Year {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u16::deserialize(deserializer)?;
        Self::new(raw).map_err(D::Error::custom)
    }
}

// ─── PracticeKey ───────────────────────────────────────────────────────────────

/// Addresses one practice part within one year, e.g. part 3 of year 2.
///
/// Serializes as the string `"<year>-<part>"` so it can key a JSON map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PracticeKey {
    year: Year,
    part: u8,
}

impl PracticeKey {
    /// Creates a key, rejecting parts outside `1..=MAX_PRACTICE_PARTS`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::PartOutOfRange`] for part 0 or parts past the cap.
    pub fn new(year: Year, part: u8) -> Result<Self, IdError> {
        if part < FIRST_PRACTICE_PART || part > MAX_PRACTICE_PARTS {
            return Err(IdError::PartOutOfRange { part });
        }
        Ok(Self { year, part })
    }

    #[must_use]
    pub fn year(&self) -> Year {
        self.year
    }

    #[must_use]
    pub fn part(&self) -> u8 {
        self.part
    }
}

impl fmt::Display for PracticeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.part)
    }
}

impl FromStr for PracticeKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IdError::MalformedPracticeKey { raw: s.to_owned() };
        let (year, part) = s.split_once('-').ok_or_else(malformed)?;
        let year: u16 = year.parse().map_err(|_| malformed())?;
        let part: u8 = part.parse().map_err(|_| malformed())?;
        Self::new(Year::new(year)?, part)
    }
}

impl Serialize for PracticeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PracticeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

// ─── SessionKey ────────────────────────────────────────────────────────────────

/// Names a resumable session slot, e.g. `year2-exam` or `daily`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    /// Creates a session key from a raw string, trimming surrounding
    /// whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed value is empty, longer than
    /// [`MAX_ID_LEN`], or contains characters outside `[A-Za-z0-9_-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptySessionKey);
        }
        if trimmed.len() > MAX_ID_LEN {
            return Err(IdError::SessionKeyTooLong { len: trimmed.len() });
        }
        if !trimmed.chars().all(is_id_char) {
            return Err(IdError::SessionKeyInvalidChar);
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for SessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(D::Error::custom)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
