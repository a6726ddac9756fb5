use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::state::SessionVariables;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .expect("placeholder pattern is valid")
    })
}

/// Fills `{{name}}` and `{name}` placeholders. Unknown names render as `[name]`
/// so a missing value is audible in review rather than silently blank.
pub fn render(template: &str, vars: &SessionVariables) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match vars.get(name) {
                Some(value) => value.to_string(),
                None => format!("[{name}]"),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::VarValue;

    #[test]
    fn substitutes_both_styles() {
        let vars: SessionVariables = [
            ("customer_name", VarValue::from("Mike")),
            ("amount", VarValue::from(5000.0)),
        ]
        .into_iter()
        .collect();

        assert_eq!(render("Hi {{customer_name}}", &vars), "Hi Mike");
        assert_eq!(render("Hi {{ customer_name }}!", &vars), "Hi Mike!");
        assert_eq!(render("That is {amount} a month", &vars), "That is 5000 a month");
    }

    #[test]
    fn missing_variables_stay_visible() {
        let vars = SessionVariables::new();
        assert_eq!(render("Hi {{customer_name}}", &vars), "Hi [customer_name]");
        assert_eq!(render("No placeholders", &vars), "No placeholders");
        assert_eq!(render("Braces { left alone }", &vars), "Braces { left alone }");
    }
}
