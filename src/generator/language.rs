use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// Response language. Serialized as the name shown in the language picker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    #[default]
    English,
    Turkish,
}

impl Language {
    /// Refusal emitted verbatim when the context has no answer.
    pub fn refusal(&self) -> &'static str {
        match self {
            Language::English => "I do not have this information in my Pokémon documents.",
            Language::Turkish => "Bu bilgi elimdeki Pokémon dokümanlarında mevcut değil.",
        }
    }

    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Turkish => "Türkçe",
        }
    }
}

impl FromStr for Language {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "türkçe" | "turkce" | "turkish" | "tr" => Ok(Language::Turkish),
            other => Err(ApiError::BadRequest(format!(
                "unsupported language '{}'; expected English or Türkçe",
                other
            ))),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.prompt_name().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prompt_name())
    }
}
