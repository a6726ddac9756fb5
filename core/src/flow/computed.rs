use tracing::debug;

use crate::graph::ComputedRule;

use super::state::{SessionVariables, VarValue};

/// Applies computed rules in declaration order. A rule only fires once all of its
/// inputs are numeric; rerunning with unchanged inputs leaves values untouched.
/// Returns the names whose value changed.
pub fn apply_computed<'a>(
    rules: impl IntoIterator<Item = &'a ComputedRule>,
    vars: &mut SessionVariables,
) -> Vec<String> {
    let mut changed = Vec::new();

    for rule in rules {
        let Some(value) = rule.expr.evaluate(vars) else {
            continue;
        };
        let value = (value * 100.0).round() / 100.0;
        if vars.overwrite(rule.target.clone(), VarValue::Number(value)) {
            debug!(target: "call_flow", variable = %rule.target, value, "computed variable updated");
            changed.push(rule.target.clone());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Expr;

    fn rule(target: &str, expression: &str) -> ComputedRule {
        ComputedRule {
            target: target.into(),
            expr: Expr::parse(expression).expect("valid expression"),
        }
    }

    #[test]
    fn derives_once_inputs_exist() {
        let rules = vec![rule("amount_reference", "employed_yearly_income / 12")];
        let mut vars = SessionVariables::new();

        assert!(apply_computed(&rules, &mut vars).is_empty());
        assert!(!vars.contains("amount_reference"));

        vars.set_if_absent("employed_yearly_income", VarValue::Number(60_000.0));
        assert_eq!(apply_computed(&rules, &mut vars), vec!["amount_reference"]);
        assert_eq!(vars.get("amount_reference"), Some(&VarValue::Number(5_000.0)));
    }

    #[test]
    fn rerun_without_new_information_is_a_no_op() {
        let rules = vec![
            rule("monthly", "yearly / 12"),
            rule("weekly_budget", "monthly / 4"),
        ];
        let mut vars: SessionVariables = [("yearly", VarValue::Number(48_000.0))].into_iter().collect();

        assert_eq!(apply_computed(&rules, &mut vars).len(), 2);
        let snapshot = vars.clone();
        assert!(apply_computed(&rules, &mut vars).is_empty());
        assert_eq!(vars, snapshot);
        assert_eq!(vars.get("weekly_budget"), Some(&VarValue::Number(1_000.0)));
    }
}
