//! Reassembles fragmented recognizer output into readable text.
//!
//! Works on whitespace-separated tokens. Every rewrite joins tokens, so the token
//! count strictly drops on each change; passes repeat until nothing changes, which
//! makes [`clean`] terminate and idempotent.

/// Multi-token fragment sequences the generic rule cannot repair on its own.
const FRAGMENT_TABLE: &[(&[&str], &str)] = &[
    (&["some", "th", "ing"], "something"),
    (&["any", "th", "ing"], "anything"),
    (&["every", "th", "ing"], "everything"),
    (&["no", "th", "ing"], "nothing"),
    (&["th", "ings"], "things"),
    (&["th", "ing"], "thing"),
    (&["y", "ear", "ly"], "yearly"),
    (&["year", "ly"], "yearly"),
    (&["month", "ly"], "monthly"),
    (&["mon", "th", "ly"], "monthly"),
    (&["mon", "thly"], "monthly"),
    (&["mon", "th"], "month"),
    (&["week", "ly"], "weekly"),
    (&["inter", "est"], "interest"),
    (&["inter", "ested"], "interested"),
    (&["mort", "gage"], "mortgage"),
    (&["insur", "ance"], "insurance"),
    (&["pay", "ment"], "payment"),
    (&["pay", "ments"], "payments"),
    (&["ap", "point", "ment"], "appointment"),
];

/// Short words that must never be glued onto the next token.
const STANDALONE_WORDS: &[&str] = &[
    "by", "my", "me", "we", "he", "be", "do", "go", "so", "no", "to", "hi", "ok", "mr", "ms",
    "dr", "st", "tv", "pm", "hm", "mm", "sh", "ya", "ye", "yo", "ha", "ma", "pa", "vs", "nd",
    "b", "c", "k", "x",
];

const SUFFIXES: &[&str] = &["'s", "'t", "'re", "'ll", "'ve", "'d", "'m", "n't"];

const TRAILING_PUNCTUATION: &[char] = &[',', '.', '!', '?', ';', ':', ')', '…'];

#[derive(Debug, Default, Clone, Copy)]
pub struct TranscriptNormalizer;

impl TranscriptNormalizer {
    pub fn clean(&self, text: &str) -> String {
        let mut tokens: Vec<String> = text
            .split_whitespace()
            .map(|token| token.replace('\u{2019}', "'"))
            .collect();

        loop {
            let before = tokens.len();
            Self::attach_punctuation(&mut tokens);
            Self::attach_suffixes(&mut tokens);
            Self::apply_fragment_table(&mut tokens);
            Self::merge_short_fragments(&mut tokens);
            if tokens.len() == before {
                break;
            }
        }

        tokens.join(" ")
    }

    fn attach_punctuation(tokens: &mut Vec<String>) {
        let mut index = 1;
        while index < tokens.len() {
            if tokens[index].chars().all(|ch| TRAILING_PUNCTUATION.contains(&ch)) {
                let punctuation = tokens.remove(index);
                tokens[index - 1].push_str(&punctuation);
            } else {
                index += 1;
            }
        }
    }

    fn attach_suffixes(tokens: &mut Vec<String>) {
        let mut index = 1;
        while index < tokens.len() {
            let (core, _) = split_trailing(&tokens[index]);
            let is_suffix = SUFFIXES.iter().any(|suffix| core.eq_ignore_ascii_case(suffix));
            let previous_ends_alpha = tokens[index - 1]
                .chars()
                .last()
                .is_some_and(|ch| ch.is_alphabetic());
            if is_suffix && previous_ends_alpha {
                let suffix = tokens.remove(index);
                tokens[index - 1].push_str(&suffix);
            } else {
                index += 1;
            }
        }
    }

    fn apply_fragment_table(tokens: &mut Vec<String>) {
        let mut index = 0;
        while index < tokens.len() {
            if let Some((fragments, word)) = FRAGMENT_TABLE
                .iter()
                .find(|(fragments, _)| matches_fragments(&tokens[index..], fragments))
            {
                let last = index + fragments.len() - 1;
                let (_, trailing) = split_trailing(&tokens[last]);
                let mut replacement = match_case(&tokens[index], word);
                replacement.push_str(trailing);
                tokens.splice(index..=last, [replacement]);
            }
            index += 1;
        }
    }

    fn merge_short_fragments(tokens: &mut Vec<String>) {
        let mut index = 0;
        while index + 1 < tokens.len() {
            if is_mergeable_fragment(&tokens[index]) && is_merge_target(&tokens[index + 1]) {
                let next = tokens.remove(index + 1);
                tokens[index].push_str(&next);
                // a still-short result may absorb the following fragment too
                continue;
            }
            index += 1;
        }
    }
}

/// Normalizes one transcript with the default rules.
pub fn clean(text: &str) -> String {
    TranscriptNormalizer.clean(text)
}

fn split_trailing(token: &str) -> (&str, &str) {
    let core = token.trim_end_matches(TRAILING_PUNCTUATION);
    (core, &token[core.len()..])
}

fn matches_fragments(tokens: &[String], fragments: &[&str]) -> bool {
    if tokens.len() < fragments.len() {
        return false;
    }
    let last = fragments.len() - 1;
    fragments.iter().enumerate().all(|(position, fragment)| {
        let token = tokens[position].as_str();
        let core = if position == last {
            split_trailing(token).0
        } else {
            token
        };
        core.eq_ignore_ascii_case(fragment)
    })
}

fn match_case(source: &str, word: &str) -> String {
    if source.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        word.to_string()
    }
}

fn is_mergeable_fragment(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    !token.is_empty()
        && token.len() <= 2
        && token.chars().all(|ch| ch.is_ascii_alphabetic())
        && !lower.starts_with(|ch: char| "aeiou".contains(ch))
        && !STANDALONE_WORDS.contains(&lower.as_str())
}

fn is_merge_target(token: &str) -> bool {
    let (core, _) = split_trailing(token);
    core.chars().next().is_some_and(|ch| ch.is_ascii_lowercase())
        && core.chars().all(|ch| ch.is_ascii_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejoins_split_words() {
        assert_eq!(clean("th ings"), "things");
        assert_eq!(clean("Th ings happen"), "Things happen");
        assert_eq!(clean("some th ing else"), "something else");
        assert_eq!(clean("my y ear ly income"), "my yearly income");
        assert_eq!(clean("I pay month ly."), "I pay monthly.");
        assert_eq!(clean("gr eat news"), "great news");
    }

    #[test]
    fn keeps_digits_and_function_words_apart() {
        assert_eq!(clean("10 to 20"), "10 to 20");
        assert_eq!(clean("by 5 pm"), "by 5 pm");
        assert_eq!(clean("we go to my place"), "we go to my place");
        assert_eq!(clean("in 90 's music"), "in 90 's music");
    }

    #[test]
    fn normalizes_punctuation_and_apostrophes() {
        assert_eq!(clean("it 's fine , thanks ."), "it's fine, thanks.");
        assert_eq!(clean("I do n't know"), "I don't know");
        assert_eq!(clean("we ’re   here !"), "we're here!");
    }

    #[test]
    fn cleaning_is_idempotent() {
        for input in [
            "th ings",
            "10 to 20",
            "some th ing , you know ?",
            "s p r ing is here",
            "  ",
            "the y ear ly plan 's cost",
        ] {
            let once = clean(input);
            assert_eq!(clean(&once), once, "input: {input:?}");
        }
    }
}
