//! Masking of offensive words in model output before it is displayed
//!
//! Only the rendered text is filtered; transcripts keep the model's words so
//! later turns see what it actually said.

use rustrict::{Censor, Type};

/// Placeholder for masked characters, swapped for an escaped `*` afterwards so
/// asterisks already in the reply keep their markdown meaning.
const MASK: char = '\u{E000}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFilter {
    Off,
    /// Severe offensive terms only.
    #[default]
    Slurs,
    Profanity,
}

impl OutputFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(OutputFilter::Off),
            "slurs" => Some(OutputFilter::Slurs),
            "profanity" => Some(OutputFilter::Profanity),
            _ => None,
        }
    }

    fn threshold(self) -> Option<Type> {
        match self {
            OutputFilter::Off => None,
            OutputFilter::Slurs => Some(Type::OFFENSIVE & Type::SEVERE),
            OutputFilter::Profanity => Some(Type::INAPPROPRIATE),
        }
    }

    /// Replaces every character of a flagged word with `\*`.
    pub fn clean(self, text: &str) -> String {
        let Some(threshold) = self.threshold() else {
            return text.to_string();
        };
        let censored = Censor::from_str(text)
            .with_censor_threshold(threshold)
            .with_censor_first_character_threshold(threshold)
            .with_censor_replacement(MASK)
            .censor();
        censored.replace(MASK, "\\*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flagged_word_is_fully_masked() {
        let out = OutputFilter::Profanity.clean("well fuck that");
        assert!(!out.to_lowercase().contains("fuck"));
        assert!(out.contains("\\*\\*\\*\\*"));
        assert!(out.starts_with("well "));
    }

    #[test]
    fn clean_text_passes_through() {
        let text = "The weather is **lovely** today.";
        assert_eq!(OutputFilter::Slurs.clean(text), text);
        assert_eq!(OutputFilter::Profanity.clean(text), text);
    }

    #[test]
    fn slur_tier_leaves_mild_words_alone() {
        assert_eq!(OutputFilter::Slurs.clean("well damn"), "well damn");
        assert_eq!(OutputFilter::Off.clean("well fuck that"), "well fuck that");
    }

    #[test]
    fn parses_config_values() {
        assert_eq!(OutputFilter::parse(" Slurs "), Some(OutputFilter::Slurs));
        assert_eq!(OutputFilter::parse("off"), Some(OutputFilter::Off));
        assert_eq!(OutputFilter::parse("profanity"), Some(OutputFilter::Profanity));
        assert_eq!(OutputFilter::parse("strict"), None);
        assert_eq!(OutputFilter::default(), OutputFilter::Slurs);
    }
}
