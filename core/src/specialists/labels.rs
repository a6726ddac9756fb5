//! Fixed label sets the classifiers choose from.

use serde::Serialize;

fn first_word(raw: &str) -> String {
    raw.trim()
        .trim_matches(|ch: char| !ch.is_ascii_alphanumeric())
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Agreement,
    Objection,
    Question,
    Information,
    Confusion,
    Farewell,
    #[default]
    Other,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Intent::Agreement,
        Intent::Objection,
        Intent::Question,
        Intent::Information,
        Intent::Confusion,
        Intent::Farewell,
        Intent::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Agreement => "agreement",
            Intent::Objection => "objection",
            Intent::Question => "question",
            Intent::Information => "information",
            Intent::Confusion => "confusion",
            Intent::Farewell => "farewell",
            Intent::Other => "other",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let word = first_word(raw);
        Self::ALL.into_iter().find(|intent| intent.as_str() == word)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Analytical,
    Amiable,
    Driver,
    Expressive,
    #[default]
    Neutral,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Analytical,
        Style::Amiable,
        Style::Driver,
        Style::Expressive,
        Style::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Analytical => "analytical",
            Style::Amiable => "amiable",
            Style::Driver => "driver",
            Style::Expressive => "expressive",
            Style::Neutral => "neutral",
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            Style::Analytical => "Be precise and give concrete figures.",
            Style::Amiable => "Be warm and reassuring.",
            Style::Driver => "Be brief and get to the point.",
            Style::Expressive => "Match their energy and keep it lively.",
            Style::Neutral => "Keep a friendly, professional tone.",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let word = first_word(raw);
        Self::ALL.into_iter().find(|style| style.as_str() == word)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tactic {
    #[default]
    Acknowledge,
    Clarify,
    Reassure,
    Inform,
    Redirect,
    Close,
}

impl Tactic {
    pub const ALL: [Tactic; 6] = [
        Tactic::Acknowledge,
        Tactic::Clarify,
        Tactic::Reassure,
        Tactic::Inform,
        Tactic::Redirect,
        Tactic::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tactic::Acknowledge => "acknowledge",
            Tactic::Clarify => "clarify",
            Tactic::Reassure => "reassure",
            Tactic::Inform => "inform",
            Tactic::Redirect => "redirect",
            Tactic::Close => "close",
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            Tactic::Acknowledge => "Acknowledge what they said before moving on.",
            Tactic::Clarify => "Ask one short clarifying question.",
            Tactic::Reassure => "Address the concern calmly and reassure them.",
            Tactic::Inform => "Answer the question directly using the facts provided.",
            Tactic::Redirect => "Gently steer back to the current step.",
            Tactic::Close => "Wrap up politely.",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        let word = first_word(raw);
        Self::ALL.into_iter().find(|tactic| tactic.as_str() == word)
    }
}

/// Parses a yes/no answer. Anything unclear counts as no.
pub fn parse_yes(raw: &str) -> bool {
    matches!(first_word(raw).as_str(), "yes" | "y" | "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_tolerate_model_noise() {
        assert_eq!(Intent::from_label(" Objection."), Some(Intent::Objection));
        assert_eq!(Intent::from_label("\"question\" because..."), Some(Intent::Question));
        assert_eq!(Intent::from_label("unsure"), None);
        assert_eq!(Style::from_label("DRIVER"), Some(Style::Driver));
        assert_eq!(Tactic::from_label("reassure: they are worried"), Some(Tactic::Reassure));
    }

    #[test]
    fn yes_no_defaults_to_no() {
        assert!(parse_yes("Yes."));
        assert!(parse_yes("yes, they agreed"));
        assert!(!parse_yes("No"));
        assert!(!parse_yes("maybe"));
        assert!(!parse_yes(""));
    }
}
