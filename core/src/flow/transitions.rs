//! Transition evaluation.
//!
//! Tier one is table-driven: variable checks filter the candidates, a lone
//! candidate is taken outright, and known affirmative or negative openings pick a
//! candidate without any model call. Tier two asks one yes/no question per
//! candidate in declaration order and takes the first "yes".

use async_trait::async_trait;
use serde::Serialize;

use crate::flow::state::SessionVariables;
use crate::graph::{Node, Transition};
use crate::specialists::TurnContext;

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "yup",
    "ya",
    "sure",
    "ok",
    "okay",
    "alright",
    "all right",
    "correct",
    "right",
    "exactly",
    "absolutely",
    "definitely",
    "certainly",
    "of course",
    "sounds good",
    "sounds great",
    "that works",
    "that's right",
    "that is right",
    "go ahead",
    "please do",
    "i do",
    "i am",
    "i'm interested",
    "why not",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "no",
    "nope",
    "nah",
    "never",
    "not really",
    "not now",
    "not interested",
    "no thanks",
    "no thank you",
    "i don't",
    "i do not",
    "i'm not",
    "i am not",
    "don't call",
    "stop calling",
    "not at the moment",
];

const NEGATION_WORDS: &[&str] = &[
    "no",
    "not",
    "never",
    "negative",
    "unwilling",
    "uninterested",
    "disagrees",
];

const NEGATION_STEMS: &[&str] = &["declin", "refus", "object", "reject", "deni", "deny"];

/// How a turn's transition decision was reached, for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPath {
    NoneEligible,
    SingleEligible,
    Affirmative,
    Negative,
    NegativeNoMatch,
    Specialist,
    SpecialistDeclined,
}

impl DecisionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionPath::NoneEligible => "none_eligible",
            DecisionPath::SingleEligible => "single_eligible",
            DecisionPath::Affirmative => "affirmative",
            DecisionPath::Negative => "negative",
            DecisionPath::NegativeNoMatch => "negative_no_match",
            DecisionPath::Specialist => "specialist",
            DecisionPath::SpecialistDeclined => "specialist_declined",
        }
    }

    /// Whether an LLM question was asked to reach this decision.
    pub fn consulted_specialist(&self) -> bool {
        matches!(self, DecisionPath::Specialist | DecisionPath::SpecialistDeclined)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDecision {
    /// Index into the node's transition list; `None` stays on the node.
    pub chosen: Option<usize>,
    pub path: DecisionPath,
}

impl TransitionDecision {
    fn take(index: usize, path: DecisionPath) -> Self {
        Self {
            chosen: Some(index),
            path,
        }
    }

    fn stay(path: DecisionPath) -> Self {
        Self { chosen: None, path }
    }
}

/// Answers "does this transition's condition hold?" for tier two.
#[async_trait]
pub trait TransitionJudge: Send + Sync {
    async fn judge(&self, ctx: &TurnContext<'_>, transition: &Transition) -> bool;
}

/// Transitions whose variable checks all pass, with their declaration index.
pub fn eligible_transitions<'n>(
    node: &'n Node,
    vars: &SessionVariables,
) -> Vec<(usize, &'n Transition)> {
    node.transitions
        .iter()
        .enumerate()
        .filter(|(_, transition)| transition.is_eligible(vars))
        .collect()
}

fn normalize_utterance(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|ch| match ch {
            '\u{2019}' => '\'',
            ch if ch.is_alphanumeric() || ch == '\'' => ch,
            _ => ' ',
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Words after the matched phrase, or `None` when no phrase opens the utterance.
fn phrase_remainder<'a>(utterance: &'a str, phrases: &[&str]) -> Option<&'a str> {
    phrases.iter().find_map(|phrase| {
        if utterance == *phrase {
            return Some("");
        }
        utterance
            .strip_prefix(phrase)
            .and_then(|rest| rest.strip_prefix(' '))
    })
}

fn starts_with_phrase(utterance: &str, phrases: &[&str]) -> bool {
    phrase_remainder(utterance, phrases).is_some()
}

fn is_negation_word(word: &str) -> bool {
    matches!(word, "no" | "not" | "never") || word.ends_with("n't")
}

/// An affirmative opening immediately followed by a negation ("I do not",
/// "of course not") does not count.
pub fn is_affirmative(text: &str) -> bool {
    phrase_remainder(&normalize_utterance(text), AFFIRMATIVE_PHRASES)
        .is_some_and(|rest| !rest.split(' ').next().is_some_and(is_negation_word))
}

pub fn is_negative(text: &str) -> bool {
    starts_with_phrase(&normalize_utterance(text), NEGATIVE_PHRASES)
}

/// Whether a condition is phrased around refusal or objection.
pub fn mentions_negation(condition: &str) -> bool {
    normalize_utterance(condition).split(' ').any(|word| {
        NEGATION_WORDS.contains(&word)
            || word.ends_with("n't")
            || NEGATION_STEMS.iter().any(|stem| word.starts_with(stem))
    })
}

/// Tier one. `None` means no deterministic rule applied and tier two must run.
pub fn fast_path(user_text: &str, eligible: &[(usize, &Transition)]) -> Option<TransitionDecision> {
    match eligible {
        [] => return Some(TransitionDecision::stay(DecisionPath::NoneEligible)),
        [(index, _)] => return Some(TransitionDecision::take(*index, DecisionPath::SingleEligible)),
        _ => {}
    }

    if is_negative(user_text) {
        return Some(
            eligible
                .iter()
                .find(|(_, transition)| mentions_negation(&transition.condition))
                .map(|(index, _)| TransitionDecision::take(*index, DecisionPath::Negative))
                .unwrap_or(TransitionDecision::stay(DecisionPath::NegativeNoMatch)),
        );
    }

    if is_affirmative(user_text) {
        let (index, _) = eligible[0];
        return Some(TransitionDecision::take(index, DecisionPath::Affirmative));
    }

    None
}

/// Full evaluation for the current node in `ctx`. Questions are asked one at a
/// time and stop at the first "yes".
pub async fn evaluate<J>(judge: &J, ctx: &TurnContext<'_>) -> TransitionDecision
where
    J: TransitionJudge + ?Sized,
{
    let eligible = eligible_transitions(ctx.node, ctx.variables);
    if let Some(decision) = fast_path(ctx.user_text, &eligible) {
        return decision;
    }

    for (index, transition) in eligible {
        if judge.judge(ctx, transition).await {
            return TransitionDecision::take(index, DecisionPath::Specialist);
        }
    }
    TransitionDecision::stay(DecisionPath::SpecialistDeclined)
}
