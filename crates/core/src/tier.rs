//! Subscription tiers and AI backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription level that determines quota ceilings and AI backend selection.
///
/// Ordered from most to least restrictive.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Pro,
    Premium,
}

impl Tier {
    /// All known tiers.
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Premium];

    /// Parse a tier name. Matching is case-insensitive and ignores surrounding
    /// whitespace, since tier strings come from an external subscription record.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            "premium" => Ok(Self::Premium),
            _ => Err(crate::Error::UnknownTier(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Downstream AI provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiBackend {
    /// Groq's OpenAI-compatible chat completions API.
    Groq,
    /// Anthropic's Messages API.
    Claude,
}

impl AiBackend {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Claude => "claude",
        }
    }
}

impl fmt::Display for AiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
