//! # Language Catalog
//!
//! Static catalog of the locales this relay can recognize and synthesize.
//! Every WebSocket connection negotiates two entries from this catalog: the
//! language the speaker talks in (`speak`) and the language the listener wants
//! to hear (`listen`).
//!
//! ## Catalog Entries:
//! - **Locale tag**: BCP-47 tag used for recognition and translation targets
//! - **Voice**: the neural voice the synthesis service uses for that locale
//! - **Display name**: human-readable name, also used in translation prompts

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A supported relay language.
///
/// Serialized as its locale tag (e.g. `"en-US"`) so the enum can be used
/// directly in query parameters, config files, and JSON responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en-US")]
    English,
    #[serde(rename = "es-ES")]
    Spanish,
    #[serde(rename = "hi-IN")]
    Hindi,
}

impl Language {
    /// All supported languages, in catalog order.
    pub const ALL: [Language; 3] = [Language::English, Language::Spanish, Language::Hindi];

    /// BCP-47 locale tag used for recognition and as a translation target key.
    pub fn locale(&self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Spanish => "es-ES",
            Language::Hindi => "hi-IN",
        }
    }

    /// Neural voice identifier for the synthesis service.
    pub fn voice(&self) -> &'static str {
        match self {
            Language::English => "en-IN-Ravi",
            Language::Spanish => "es-ES-ElviraNeural",
            Language::Hindi => "hi-IN-SwaraNeural",
        }
    }

    /// Human-readable name, used in the catalog endpoint and in the
    /// translation prompt sent to the hosted language model.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::Hindi => "Hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.locale())
    }
}

impl FromStr for Language {
    type Err = AppError;

    /// Parse a locale tag from a query parameter or config value.
    ///
    /// Anything outside the supported set fails with `InvalidLanguage`,
    /// which rejects the connection before any audio is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en-US" => Ok(Language::English),
            "es-ES" => Ok(Language::Spanish),
            "hi-IN" => Ok(Language::Hindi),
            other => Err(AppError::InvalidLanguage(other.to_string())),
        }
    }
}

/// The language pair negotiated for one session.
///
/// `speak` drives recognition, `listen` selects the translation target and
/// the synthesis voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    pub speak: Language,
    pub listen: Language,
}

impl LanguagePair {
    pub fn new(speak: Language, listen: Language) -> Self {
        Self { speak, listen }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.speak.locale(), self.listen.locale())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_locales() {
        for lang in Language::ALL {
            let parsed: Language = lang.locale().parse().unwrap();
            assert_eq!(parsed, lang);
        }
    }

    #[test]
    fn test_parse_unsupported_locale() {
        let result = "fr-FR".parse::<Language>();
        match result {
            Err(AppError::InvalidLanguage(value)) => assert_eq!(value, "fr-FR"),
            other => panic!("Expected InvalidLanguage, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!("EN-us".parse::<Language>().is_err());
        assert!("".parse::<Language>().is_err());
    }

    #[test]
    fn test_voice_mapping() {
        assert_eq!(Language::Spanish.voice(), "es-ES-ElviraNeural");
        assert_eq!(Language::English.voice(), "en-IN-Ravi");
        assert_eq!(Language::Hindi.voice(), "hi-IN-SwaraNeural");
    }

    #[test]
    fn test_serde_round_trip_uses_locale_tags() {
        let json = serde_json::to_string(&Language::Hindi).unwrap();
        assert_eq!(json, "\"hi-IN\"");
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Language::Hindi);
    }

    #[test]
    fn test_pair_display() {
        let pair = LanguagePair::new(Language::English, Language::Spanish);
        assert_eq!(pair.to_string(), "en-US->es-ES");
    }
}
