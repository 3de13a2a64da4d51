//! Conditional-formatting expressions.
//!
//! An expression is parsed into a [`SpecCondition`] before evaluation. Parsing
//! and evaluation are lenient: malformed expressions and missing values never
//! match and never raise.

use std::cmp::Ordering;

use crate::spec::{EnumCellValue, SpecCellStyle, SpecConditionalRule};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumConditionOp {
    Ge,
    Le,
    Ne,
    Eq,
    Gt,
    Lt,
}

/// Operators in the order they are tried; two-character operators first.
const TUP_CONDITION_OPS: [(&str, EnumConditionOp); 6] = [
    (">=", EnumConditionOp::Ge),
    ("<=", EnumConditionOp::Le),
    ("!=", EnumConditionOp::Ne),
    ("==", EnumConditionOp::Eq),
    (">", EnumConditionOp::Gt),
    ("<", EnumConditionOp::Lt),
];

impl EnumConditionOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Ge => ordering != Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Ne => ordering != Ordering::Equal,
            Self::Eq => ordering == Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Lt => ordering == Ordering::Less,
        }
    }
}

/// Typed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecCondition {
    /// `contains "text"`: substring match on the value's text.
    Contains(String),
    /// `<op> <operand>`.
    Compare {
        op: EnumConditionOp,
        operand: String,
    },
}

/// Parse an expression; `None` for empty or unrecognised input.
pub fn parse_condition(expr: &str) -> Option<SpecCondition> {
    let c_expr = expr.trim();
    if c_expr.is_empty() {
        return None;
    }

    if let Some(c_rest) = c_expr.strip_prefix("contains") {
        let c_needle = strip_quotes(c_rest.trim());
        if c_needle.is_empty() {
            return None;
        }
        return Some(SpecCondition::Contains(c_needle.to_string()));
    }

    for (c_op, op) in TUP_CONDITION_OPS {
        if let Some(c_rest) = c_expr.strip_prefix(c_op) {
            let c_operand = strip_quotes(c_rest.trim());
            if c_operand.is_empty() {
                return None;
            }
            return Some(SpecCondition::Compare {
                op,
                operand: c_operand.to_string(),
            });
        }
    }

    None
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

impl SpecCondition {
    /// Evaluate against one cell value.
    pub fn matches(&self, value: &EnumCellValue) -> bool {
        if matches!(value, EnumCellValue::None) {
            return false;
        }
        match self {
            Self::Contains(needle) => value.to_string().contains(needle.as_str()),
            Self::Compare { op, operand } => {
                if let EnumCellValue::Number(n_value) = value
                    && let Ok(n_operand) = operand.parse::<f64>()
                {
                    return n_value
                        .partial_cmp(&n_operand)
                        .is_some_and(|ordering| op.accepts(ordering));
                }
                op.accepts(value.to_string().as_str().cmp(operand.as_str()))
            }
        }
    }
}

/// Parse and evaluate `expr` against `value`; malformed input gives `false`.
pub fn evaluate_condition(value: &EnumCellValue, expr: &str) -> bool {
    parse_condition(expr).is_some_and(|cond| cond.matches(value))
}

/// Style of the first rule whose condition matches `value`.
///
/// Rules after the first match are not evaluated.
pub fn select_conditional_style<'a>(
    value: &EnumCellValue,
    rules: &'a [SpecConditionalRule],
) -> Option<&'a SpecCellStyle> {
    rules
        .iter()
        .find(|rule| evaluate_condition(value, &rule.expression))
        .map(|rule| &rule.style)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(val: f64) -> EnumCellValue {
        EnumCellValue::Number(val)
    }

    #[test]
    fn test_parse_prefers_two_char_operators() {
        assert_eq!(
            parse_condition(">= 10"),
            Some(SpecCondition::Compare {
                op: EnumConditionOp::Ge,
                operand: "10".to_string()
            })
        );
        assert_eq!(
            parse_condition("<=5"),
            Some(SpecCondition::Compare {
                op: EnumConditionOp::Le,
                operand: "5".to_string()
            })
        );
        assert_eq!(
            parse_condition("contains \"err\""),
            Some(SpecCondition::Contains("err".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_empty_and_unknown() {
        assert_eq!(parse_condition(""), None);
        assert_eq!(parse_condition("   "), None);
        assert_eq!(parse_condition("between 1 and 2"), None);
        assert_eq!(parse_condition(">"), None);
        assert_eq!(parse_condition("contains"), None);
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(evaluate_condition(&num(150.0), ">100"));
        assert!(!evaluate_condition(&num(100.0), ">100"));
        assert!(evaluate_condition(&num(100.0), ">=100"));
        assert!(evaluate_condition(&num(9.0), "< 10"));
        assert!(evaluate_condition(&num(10.0), "== 10.0"));
        assert!(evaluate_condition(&num(10.0), "!= 11"));
        assert!(evaluate_condition(&num(-1.5), "<= -1.5"));
    }

    #[test]
    fn test_numeric_value_with_text_operand_falls_back_to_lexical() {
        assert!(evaluate_condition(&num(5.0), "< abc"));
        assert!(!evaluate_condition(&num(5.0), "== abc"));
    }

    #[test]
    fn test_string_values_compare_lexically() {
        let value = EnumCellValue::from("150");
        assert!(evaluate_condition(&value, "> 100"));
        // lexical: "9" > "10"
        assert!(evaluate_condition(&EnumCellValue::from("9"), "> 10"));
        assert!(evaluate_condition(&EnumCellValue::from("done"), "== 'done'"));
        assert!(evaluate_condition(
            &EnumCellValue::from("fatal error"),
            "contains error"
        ));
    }

    #[test]
    fn test_none_and_malformed_never_match() {
        assert!(!evaluate_condition(&EnumCellValue::None, "!= 1"));
        assert!(!evaluate_condition(&EnumCellValue::None, "contains x"));
        assert!(!evaluate_condition(&num(1.0), "~~ 1"));
        assert!(!evaluate_condition(&num(1.0), ""));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let style_x = SpecCellStyle::default().with_fill_color("#00FF00");
        let style_y = SpecCellStyle::default().with_fill_color("#FF0000");
        let rules = vec![
            SpecConditionalRule::new(">100", style_x.clone()),
            SpecConditionalRule::new(">50", style_y.clone()),
        ];

        assert_eq!(select_conditional_style(&num(150.0), &rules), Some(&style_x));
        assert_eq!(select_conditional_style(&num(60.0), &rules), Some(&style_y));
        assert_eq!(select_conditional_style(&num(10.0), &rules), None);
    }

    #[test]
    fn test_malformed_rule_is_skipped_not_fatal() {
        let style = SpecCellStyle::default().with_bold(true);
        let rules = vec![
            SpecConditionalRule::new("???", SpecCellStyle::default()),
            SpecConditionalRule::new("<50", style.clone()),
        ];
        assert_eq!(select_conditional_style(&num(10.0), &rules), Some(&style));
    }
}
