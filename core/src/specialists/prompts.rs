//! Message builders for each specialist. Every prompt asks one narrow question
//! with a closed answer format so replies stay a few tokens long.

use crate::flow::state::{ConversationTurn, Speaker};
use crate::graph::{VarKind, VariableSpec};

use super::labels::{Intent, Style, Tactic};
use super::team::Advice;
use super::traits::{ChatMessage, TurnContext};

pub const END_CALL_MARKER: &str = "[END_CALL]";

pub fn format_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "(no prior turns)".into();
    }
    history
        .iter()
        .map(|turn| {
            let speaker = match turn.speaker {
                Speaker::User => "Caller",
                Speaker::Agent => "Agent",
            };
            format!("{speaker}: {}", turn.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn label_list<T>(labels: &[T], name: impl Fn(&T) -> &'static str) -> String {
    labels.iter().map(name).collect::<Vec<_>>().join(", ")
}

pub fn intent_messages(ctx: &TurnContext<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Classify the caller's intent in a phone conversation. Answer with exactly one word from: {}.",
            label_list(&Intent::ALL, Intent::as_str)
        )),
        ChatMessage::user(format!(
            "Conversation so far:\n{}\n\nCaller just said: \"{}\"\nIntent:",
            format_history(ctx.history),
            ctx.user_text
        )),
    ]
}

pub fn style_messages(ctx: &TurnContext<'_>) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Classify the caller's communication style. Answer with exactly one word from: {}.",
            label_list(&Style::ALL, Style::as_str)
        )),
        ChatMessage::user(format!(
            "Conversation so far:\n{}\n\nCaller just said: \"{}\"\nStyle:",
            format_history(ctx.history),
            ctx.user_text
        )),
    ]
}

pub fn tactic_messages(ctx: &TurnContext<'_>, intent: Intent) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Pick the best next conversational tactic for a phone agent. Answer with exactly one word from: {}.",
            label_list(&Tactic::ALL, Tactic::as_str)
        )),
        ChatMessage::user(format!(
            "Current step goal: {}\nCaller intent: {}\nCaller just said: \"{}\"\nTactic:",
            ctx.node.mode.text(),
            intent.as_str(),
            ctx.user_text
        )),
    ]
}

pub fn transition_messages(ctx: &TurnContext<'_>, condition: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You judge whether one condition holds in a phone conversation. Answer only yes or no.",
        ),
        ChatMessage::user(format!(
            "Conversation so far:\n{}\n\nCaller just said: \"{}\"\n\nCondition: {}\nDoes the condition hold?",
            format_history(ctx.history),
            ctx.user_text,
            condition
        )),
    ]
}

pub fn extraction_messages(ctx: &TurnContext<'_>, variables: &[VariableSpec]) -> Vec<ChatMessage> {
    let fields = variables
        .iter()
        .map(|variable| {
            let hint = match variable.kind {
                VarKind::String => "string",
                VarKind::Number => "number without currency symbols or separators",
                VarKind::Boolean => "true or false",
            };
            if variable.description.is_empty() {
                format!("- {} ({hint})", variable.name)
            } else {
                format!("- {} ({hint}): {}", variable.name, variable.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        ChatMessage::system(
            "Extract values the caller stated explicitly. Reply with a single JSON object whose keys are the requested names. Use null for anything not clearly stated; never guess.",
        ),
        ChatMessage::user(format!(
            "Requested fields:\n{fields}\n\nRecent conversation:\n{}\n\nCaller just said: \"{}\"\nJSON:",
            format_history(ctx.history),
            ctx.user_text
        )),
    ]
}

fn persona(ctx: &TurnContext<'_>) -> String {
    let mut system = String::from(
        "You are a voice agent on a live phone call. Reply with one or two short spoken sentences. No lists, no markdown.",
    );
    if !ctx.global_prompt.trim().is_empty() {
        system.push_str("\n\n");
        system.push_str(ctx.global_prompt.trim());
    }
    system
}

/// Prompt for a prompt-mode node. `instructions` already has placeholders filled.
pub fn response_messages(
    ctx: &TurnContext<'_>,
    instructions: &str,
    advice: &Advice,
) -> Vec<ChatMessage> {
    let mut guidance = format!(
        "Caller intent: {}\nCaller style: {} ({})\nTactic: {} ({})",
        advice.intent.as_str(),
        advice.style.as_str(),
        advice.style.guidance(),
        advice.tactic.as_str(),
        advice.tactic.guidance()
    );
    if !advice.snippets.is_empty() {
        guidance.push_str("\nRelevant knowledge:");
        for snippet in &advice.snippets {
            guidance.push_str("\n- ");
            guidance.push_str(snippet.content.trim());
        }
    }

    vec![
        ChatMessage::system(format!(
            "{}\n\nIf and only if the conversation should end now, append {END_CALL_MARKER}.",
            persona(ctx)
        )),
        ChatMessage::user(format!(
            "Step instructions:\n{instructions}\n\n{guidance}\n\nConversation so far:\n{}\n\nCaller just said: \"{}\"\nYour reply:",
            format_history(ctx.history),
            ctx.user_text
        )),
    ]
}

/// Prompt used when the call stays on a script node: acknowledge, then re-ask.
pub fn loop_messages(ctx: &TurnContext<'_>, script: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(persona(ctx)),
        ChatMessage::user(format!(
            "The caller has not yet answered what this step needs. Briefly acknowledge what they said, then ask again using this wording as closely as possible:\n\"{script}\"\n\nConversation so far:\n{}\n\nCaller just said: \"{}\"\nYour reply:",
            format_history(ctx.history),
            ctx.user_text
        )),
    ]
}

/// Splits an `[END_CALL]` marker off a generated reply.
pub fn strip_end_call(text: &str) -> (String, bool) {
    if text.contains(END_CALL_MARKER) {
        let cleaned = text.replace(END_CALL_MARKER, " ");
        (cleaned.split_whitespace().collect::<Vec<_>>().join(" "), true)
    } else {
        (text.trim().to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_call_marker_is_removed_from_spoken_text() {
        let (text, end) = strip_end_call("Thanks for your time, goodbye! [END_CALL]");
        assert_eq!(text, "Thanks for your time, goodbye!");
        assert!(end);

        let (text, end) = strip_end_call("  Sounds good.  ");
        assert_eq!(text, "Sounds good.");
        assert!(!end);
    }

    #[test]
    fn history_is_labelled_by_speaker() {
        let history = vec![
            ConversationTurn::new(Speaker::Agent, "Hi Mike", "a"),
            ConversationTurn::new(Speaker::User, "sure", "a"),
        ];
        assert_eq!(format_history(&history), "Agent: Hi Mike\nCaller: sure");
        assert_eq!(format_history(&[]), "(no prior turns)");
    }
}
