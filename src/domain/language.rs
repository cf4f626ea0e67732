//! Site languages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The languages the site serves content in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    #[serde(rename = "HY")]
    Hy,
    #[serde(rename = "RU")]
    Ru,
    #[default]
    #[serde(rename = "EN")]
    En,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Hy, Language::Ru, Language::En];

    pub const fn tag(&self) -> &'static str {
        match self {
            Language::Hy => "HY",
            Language::Ru => "RU",
            Language::En => "EN",
        }
    }

    /// Parse a language tag, case-insensitively.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "HY" => Some(Language::Hy),
            "RU" => Some(Language::Ru),
            "EN" => Some(Language::En),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
