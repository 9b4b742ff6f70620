use std::ops::Deref;

use rand::{distributions::Alphanumeric, Rng};

pub const MAX_CODE_LENGTH: usize = 100;

/// First path segments taken by fixed routes. A link under one of these
/// codes could never be resolved.
pub const RESERVED_CODES: &[&str] = &[
    "health", "links", "login", "logout", "me", "register", "shorten", "static",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeValidationFailed {
    #[error("code is empty")]
    Empty,
    #[error("too long, maximum length of a code is {}", MAX_CODE_LENGTH)]
    TooLong,
    #[error("invalid characters: {}", .0.iter().collect::<String>())]
    InvalidCharacters(Vec<char>),
}

/// A URL-safe short code: ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

impl ShortCode {
    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_CODES.contains(&self.0.as_str())
    }
}

impl Deref for ShortCode {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShortCode {
    type Error = CodeValidationFailed;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(CodeValidationFailed::Empty);
        }

        if value.len() > MAX_CODE_LENGTH {
            return Err(CodeValidationFailed::TooLong);
        }

        let invalid_chars: Vec<char> = value
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
            .collect();

        if !invalid_chars.is_empty() {
            return Err(CodeValidationFailed::InvalidCharacters(invalid_chars));
        }

        Ok(Self(value))
    }
}

impl TryFrom<&str> for ShortCode {
    type Error = CodeValidationFailed;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Source of candidate codes. Uniqueness is enforced by storage, so an
/// implementation only has to produce valid codes.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

/// Random base62 codes of a fixed length.
#[derive(Debug, Clone)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(1, MAX_CODE_LENGTH),
        }
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> ShortCode {
        let code: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();

        ShortCode(code)
    }
}
