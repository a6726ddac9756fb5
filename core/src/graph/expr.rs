//! Arithmetic for computed variables and comparisons for transition checks.
//!
//! The grammar is deliberately small: a computed expression is a chain of numeric
//! literals and variable names joined by `+ - * /` (multiplication and division bind
//! tighter, no parentheses); a check is either a bare variable name or
//! `name OP literal` with OP one of `> >= < <= == !=`.

use thiserror::Error;

use crate::flow::state::{parse_amount, SessionVariables, VarValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character `{0}`")]
    UnexpectedChar(char),
    #[error("expected an operand at position {0}")]
    ExpectedOperand(usize),
    #[error("expected an operator at position {0}")]
    ExpectedOperator(usize),
    #[error("invalid variable name `{0}`")]
    InvalidName(String),
    #[error("missing literal after comparison operator")]
    MissingLiteral,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Variable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Operand(Operand),
    Op(ArithOp),
}

/// Parsed arithmetic expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    first: Operand,
    rest: Vec<(ArithOp, Operand)>,
}

impl Expr {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let lexemes = lex(source)?;
        let mut iter = lexemes.into_iter().enumerate();

        let first = match iter.next() {
            Some((_, Lexeme::Operand(operand))) => operand,
            Some((position, Lexeme::Op(_))) => return Err(ExprError::ExpectedOperand(position)),
            None => return Err(ExprError::Empty),
        };

        let mut rest = Vec::new();
        while let Some((position, lexeme)) = iter.next() {
            let op = match lexeme {
                Lexeme::Op(op) => op,
                Lexeme::Operand(_) => return Err(ExprError::ExpectedOperator(position)),
            };
            match iter.next() {
                Some((_, Lexeme::Operand(operand))) => rest.push((op, operand)),
                Some((position, _)) => return Err(ExprError::ExpectedOperand(position)),
                None => return Err(ExprError::ExpectedOperand(position + 1)),
            }
        }

        Ok(Self { first, rest })
    }

    /// Variable names the expression reads.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(&self.first)
            .chain(self.rest.iter().map(|(_, operand)| operand))
            .filter_map(|operand| match operand {
                Operand::Variable(name) => Some(name.as_str()),
                Operand::Number(_) => None,
            })
    }

    /// Evaluates the expression. `None` when an input is missing or not numeric,
    /// on division by zero, or when the result is not finite.
    pub fn evaluate(&self, vars: &SessionVariables) -> Option<f64> {
        let value_of = |operand: &Operand| match operand {
            Operand::Number(value) => Some(*value),
            Operand::Variable(name) => vars.get(name).and_then(VarValue::as_number),
        };

        let mut total = 0.0;
        let mut term = value_of(&self.first)?;
        for (op, operand) in &self.rest {
            let value = value_of(operand)?;
            match op {
                ArithOp::Mul => term *= value,
                ArithOp::Div => {
                    if value == 0.0 {
                        return None;
                    }
                    term /= value;
                }
                ArithOp::Add => {
                    total += term;
                    term = value;
                }
                ArithOp::Sub => {
                    total += term;
                    term = -value;
                }
            }
        }
        total += term;

        total.is_finite().then_some(total)
    }
}

fn lex(source: &str) -> Result<Vec<Lexeme>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut lexemes = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        let op = match ch {
            '+' => Some(ArithOp::Add),
            '-' => Some(ArithOp::Sub),
            '*' => Some(ArithOp::Mul),
            '/' => Some(ArithOp::Div),
            _ => None,
        };
        if let Some(op) = op {
            lexemes.push(Lexeme::Op(op));
            index += 1;
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_digit() || matches!(chars[index], '.' | '_' | ',')) {
                index += 1;
            }
            let literal: String = chars[start..index]
                .iter()
                .filter(|ch| !matches!(ch, '_' | ','))
                .collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ExprError::UnexpectedChar(ch))?;
            lexemes.push(Lexeme::Operand(Operand::Number(value)));
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            let name: String = chars[start..index].iter().collect();
            lexemes.push(Lexeme::Operand(Operand::Variable(name)));
            continue;
        }

        return Err(ExprError::UnexpectedChar(ch));
    }

    Ok(lexemes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// One entry of a transition's `check_variables` list.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableCheck {
    Present(String),
    Compare {
        variable: String,
        op: CompareOp,
        value: VarValue,
    },
}

impl VariableCheck {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ExprError::Empty);
        }

        // Two-character operators first so `>=` is not read as `>`.
        let operators = [
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
        ];

        for (symbol, op) in operators {
            if let Some(position) = trimmed.find(symbol) {
                let variable = trimmed[..position].trim();
                let literal = trimmed[position + symbol.len()..].trim();
                validate_name(variable)?;
                if literal.is_empty() {
                    return Err(ExprError::MissingLiteral);
                }
                return Ok(VariableCheck::Compare {
                    variable: variable.to_string(),
                    op,
                    value: parse_literal(literal),
                });
            }
        }

        validate_name(trimmed)?;
        Ok(VariableCheck::Present(trimmed.to_string()))
    }

    pub fn variable(&self) -> &str {
        match self {
            VariableCheck::Present(name) => name,
            VariableCheck::Compare { variable, .. } => variable,
        }
    }

    /// Absent variables never satisfy a check.
    pub fn is_met(&self, vars: &SessionVariables) -> bool {
        match self {
            VariableCheck::Present(name) => vars.contains(name),
            VariableCheck::Compare { variable, op, value } => match vars.get(variable) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
        }
    }
}

fn validate_name(name: &str) -> Result<(), ExprError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ExprError::InvalidName(name.to_string()))
    }
}

fn parse_literal(literal: &str) -> VarValue {
    let unquoted = literal
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')));
    if let Some(text) = unquoted {
        return VarValue::Text(text.to_string());
    }

    match literal.to_ascii_lowercase().as_str() {
        "true" => return VarValue::Bool(true),
        "false" => return VarValue::Bool(false),
        _ => {}
    }

    match parse_amount(literal) {
        Some(number) => VarValue::Number(number),
        None => VarValue::Text(literal.to_string()),
    }
}

fn compare(actual: &VarValue, op: CompareOp, expected: &VarValue) -> bool {
    if let VarValue::Number(expected_number) = expected {
        let Some(actual_number) = actual.as_number() else {
            return false;
        };
        return match op {
            CompareOp::Gt => actual_number > *expected_number,
            CompareOp::Ge => actual_number >= *expected_number,
            CompareOp::Lt => actual_number < *expected_number,
            CompareOp::Le => actual_number <= *expected_number,
            CompareOp::Eq => actual_number == *expected_number,
            CompareOp::Ne => actual_number != *expected_number,
        };
    }

    let equal = match (actual, expected) {
        (_, VarValue::Bool(expected_bool)) => actual.as_bool() == Some(*expected_bool),
        (VarValue::Text(left), VarValue::Text(right)) => left.trim().eq_ignore_ascii_case(right.trim()),
        (left, VarValue::Text(right)) => left.to_string().eq_ignore_ascii_case(right.trim()),
        _ => false,
    };

    match op {
        CompareOp::Eq => equal,
        CompareOp::Ne => !equal,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, VarValue)]) -> SessionVariables {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn evaluates_with_precedence() {
        let expr = Expr::parse("base + bonus * 2 - 10 / 5").expect("parse");
        let values = vars(&[("base", 100.0.into()), ("bonus", 20.0.into())]);
        assert_eq!(expr.evaluate(&values), Some(138.0));
        assert_eq!(expr.variables().collect::<Vec<_>>(), vec!["base", "bonus"]);
    }

    #[test]
    fn yearly_to_monthly() {
        let expr = Expr::parse("employed_yearly_income / 12").expect("parse");
        let values = vars(&[("employed_yearly_income", 60_000.0.into())]);
        assert_eq!(expr.evaluate(&values), Some(5_000.0));
    }

    #[test]
    fn missing_input_and_zero_division_yield_none() {
        let expr = Expr::parse("a / b").expect("parse");
        assert_eq!(expr.evaluate(&vars(&[("a", 1.0.into())])), None);
        assert_eq!(
            expr.evaluate(&vars(&[("a", 1.0.into()), ("b", 0.0.into())])),
            None
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(Expr::parse(""), Err(ExprError::Empty));
        assert!(matches!(Expr::parse("a +"), Err(ExprError::ExpectedOperand(_))));
        assert!(matches!(Expr::parse("a b"), Err(ExprError::ExpectedOperator(_))));
        assert_eq!(Expr::parse("(a)"), Err(ExprError::UnexpectedChar('(')));
    }

    #[test]
    fn parses_checks() {
        assert_eq!(
            VariableCheck::parse(" customer_name "),
            Ok(VariableCheck::Present("customer_name".into()))
        );
        assert_eq!(
            VariableCheck::parse("amount_reference > 8000"),
            Ok(VariableCheck::Compare {
                variable: "amount_reference".into(),
                op: CompareOp::Gt,
                value: VarValue::Number(8000.0),
            })
        );
        assert!(matches!(
            VariableCheck::parse("income >= $5,000"),
            Ok(VariableCheck::Compare { op: CompareOp::Ge, value: VarValue::Number(v), .. }) if v == 5000.0
        ));
        assert!(VariableCheck::parse("bad name > 3").is_err());
        assert_eq!(VariableCheck::parse("x >"), Err(ExprError::MissingLiteral));
    }

    #[test]
    fn checks_against_variables() {
        let values = vars(&[
            ("amount_reference", 5_000.0.into()),
            ("employed", true.into()),
            ("plan", "Gold".into()),
        ]);
        assert!(!VariableCheck::parse("amount_reference > 8000").unwrap().is_met(&values));
        assert!(VariableCheck::parse("amount_reference <= 5000").unwrap().is_met(&values));
        assert!(VariableCheck::parse("employed == true").unwrap().is_met(&values));
        assert!(VariableCheck::parse("plan == gold").unwrap().is_met(&values));
        assert!(VariableCheck::parse("plan != silver").unwrap().is_met(&values));
        assert!(!VariableCheck::parse("missing > 1").unwrap().is_met(&values));
        assert!(!VariableCheck::parse("missing").unwrap().is_met(&values));
    }
}
