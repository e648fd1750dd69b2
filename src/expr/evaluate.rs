//! In-process evaluation of conditions whose operands are all known before touching the
//! database: literals, `ctx.*` values, enum values and explicit inputs.

use crate::error::CompileError;
use crate::expr::{Comparison, Condition, ConditionVisitor, Operand, Operator};
use crate::schema::Schema;
use crate::sql::SqlValue;
use std::cmp::Ordering;

/// Supplies concrete values for operands during evaluation.
pub trait ValueSource {
    fn value_of(&self, operand: &Operand) -> Result<SqlValue, CompileError>;
}

impl Operand {
    /// Concrete value of a literal operand; `None` for identifiers.
    pub fn literal_value(&self) -> Option<SqlValue> {
        Some(match self {
            Operand::Ident(_) => return None,
            Operand::String(s) => SqlValue::Text(s.clone()),
            Operand::Number(n) => SqlValue::Int(*n),
            Operand::Decimal(n) => SqlValue::Float(*n),
            Operand::Bool(b) => SqlValue::Bool(*b),
            Operand::Null => SqlValue::Null,
            Operand::Array(items) => SqlValue::Array(
                items
                    .iter()
                    .map(Operand::literal_value)
                    .collect::<Option<Vec<_>>>()?,
            ),
        })
    }
}

pub struct Evaluator<'a, S: ValueSource> {
    source: &'a S,
}

impl<'a, S: ValueSource> Evaluator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Evaluator { source }
    }

    pub fn evaluate(&mut self, condition: &Condition) -> Result<bool, CompileError> {
        condition.accept(self)
    }
}

impl<S: ValueSource> ConditionVisitor for Evaluator<'_, S> {
    type Output = bool;
    type Error = CompileError;

    fn visit_leaf(&mut self, leaf: &Comparison) -> Result<bool, CompileError> {
        let lhs = self.source.value_of(&leaf.lhs)?;
        match (leaf.operator, &leaf.rhs) {
            (None, None) => match lhs {
                SqlValue::Bool(b) => Ok(b),
                SqlValue::Null => Ok(false),
                _ => Err(CompileError::TypeMismatch(format!("{} is not a boolean", leaf.lhs))),
            },
            (Some(op), Some(rhs)) => compare(&lhs, op, &self.source.value_of(rhs)?),
            _ => Err(CompileError::TypeMismatch(format!("incomplete comparison on {}", leaf.lhs))),
        }
    }

    fn visit_and(&mut self, terms: Vec<bool>) -> Result<bool, CompileError> {
        Ok(terms.into_iter().all(|t| t))
    }

    fn visit_or(&mut self, terms: Vec<bool>) -> Result<bool, CompileError> {
        Ok(terms.into_iter().any(|t| t))
    }

    fn visit_not(&mut self, inner: bool) -> Result<bool, CompileError> {
        Ok(!inner)
    }
}

/// Null-safe comparison with SQL `IS [NOT] DISTINCT FROM` semantics for `==`/`!=`:
/// two nulls are equal, a null and a value are distinct. Ordering against null is false.
pub fn compare(lhs: &SqlValue, op: Operator, rhs: &SqlValue) -> Result<bool, CompileError> {
    match op {
        Operator::In | Operator::NotIn => {
            let items = match rhs {
                SqlValue::Array(items) => items,
                SqlValue::Null => return Ok(op == Operator::NotIn),
                _ => {
                    return Err(CompileError::TypeMismatch(format!(
                        "right side of {} must be an array",
                        op
                    )))
                }
            };
            let mut found = false;
            for item in items {
                if equal(lhs, item)? {
                    found = true;
                    break;
                }
            }
            return Ok(found == (op == Operator::In));
        }
        Operator::Assign => {
            return Err(CompileError::UnsupportedOperator {
                operator: op.to_string(),
                reason: "assignment in a condition".into(),
            })
        }
        _ => {}
    }
    match (lhs.is_null(), rhs.is_null()) {
        (true, true) => return Ok(op == Operator::Equals),
        (true, false) | (false, true) => return Ok(op == Operator::NotEquals),
        _ => {}
    }
    Ok(match op {
        Operator::Equals => equal(lhs, rhs)?,
        Operator::NotEquals => !equal(lhs, rhs)?,
        Operator::LessThan => ordering(lhs, rhs)? == Ordering::Less,
        Operator::LessThanOrEquals => ordering(lhs, rhs)? != Ordering::Greater,
        Operator::GreaterThan => ordering(lhs, rhs)? == Ordering::Greater,
        Operator::GreaterThanOrEquals => ordering(lhs, rhs)? != Ordering::Less,
        Operator::In | Operator::NotIn | Operator::Assign => false,
    })
}

fn equal(lhs: &SqlValue, rhs: &SqlValue) -> Result<bool, CompileError> {
    match (lhs, rhs) {
        (SqlValue::Null, SqlValue::Null) => Ok(true),
        (SqlValue::Null, _) | (_, SqlValue::Null) => Ok(false),
        (SqlValue::Json(a), SqlValue::Json(b)) => Ok(a == b),
        (SqlValue::Array(a), SqlValue::Array(b)) => Ok(a == b),
        _ => Ok(ordering(lhs, rhs)? == Ordering::Equal),
    }
}

fn ordering(lhs: &SqlValue, rhs: &SqlValue) -> Result<Ordering, CompileError> {
    let ord = match (lhs, rhs) {
        (SqlValue::Int(a), SqlValue::Int(b)) => Some(a.cmp(b)),
        (SqlValue::Int(a), SqlValue::Float(b)) => (*a as f64).partial_cmp(b),
        (SqlValue::Float(a), SqlValue::Int(b)) => a.partial_cmp(&(*b as f64)),
        (SqlValue::Float(a), SqlValue::Float(b)) => a.partial_cmp(b),
        (SqlValue::Text(a), SqlValue::Text(b)) => Some(a.cmp(b)),
        (SqlValue::Bool(a), SqlValue::Bool(b)) => Some(a.cmp(b)),
        (SqlValue::Timestamp(a), SqlValue::Timestamp(b)) => Some(a.cmp(b)),
        (SqlValue::Date(a), SqlValue::Date(b)) => Some(a.cmp(b)),
        _ => {
            return Err(CompileError::TypeMismatch(format!(
                "cannot compare {:?} with {:?}",
                lhs, rhs
            )))
        }
    };
    ord.ok_or_else(|| CompileError::TypeMismatch("NaN is not comparable".into()))
}

/// True when every operand is a literal, a `ctx.*` value or an enum value, so the
/// condition can be decided without reading rows.
pub fn is_statically_decidable(condition: &Condition, schema: &Schema) -> bool {
    condition
        .accept(&mut StaticCheck { schema })
        .unwrap_or(false)
}

struct StaticCheck<'a> {
    schema: &'a Schema,
}

impl StaticCheck<'_> {
    fn operand(&self, operand: &Operand) -> bool {
        match operand {
            Operand::Ident(path) => {
                operand.is_context()
                    || (path.len() == 2 && self.schema.find_enum(&path[0]).is_some())
            }
            Operand::Array(items) => items.iter().all(|i| self.operand(i)),
            _ => true,
        }
    }
}

impl ConditionVisitor for StaticCheck<'_> {
    type Output = bool;
    type Error = std::convert::Infallible;

    fn visit_leaf(&mut self, leaf: &Comparison) -> Result<bool, Self::Error> {
        Ok(leaf.operands().all(|o| self.operand(o)))
    }

    fn visit_and(&mut self, terms: Vec<bool>) -> Result<bool, Self::Error> {
        Ok(terms.into_iter().all(|t| t))
    }

    fn visit_or(&mut self, terms: Vec<bool>) -> Result<bool, Self::Error> {
        Ok(terms.into_iter().all(|t| t))
    }

    fn visit_not(&mut self, inner: bool) -> Result<bool, Self::Error> {
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EnumDef;
    use rstest::rstest;

    struct Literals;

    impl ValueSource for Literals {
        fn value_of(&self, operand: &Operand) -> Result<SqlValue, CompileError> {
            operand
                .literal_value()
                .ok_or_else(|| CompileError::UnresolvableIdentifier(operand.to_string()))
        }
    }

    #[rstest]
    #[case::both_null_equal(SqlValue::Null, Operator::Equals, SqlValue::Null, true)]
    #[case::both_null_not_equal(SqlValue::Null, Operator::NotEquals, SqlValue::Null, false)]
    #[case::one_null_equal(SqlValue::Null, Operator::Equals, SqlValue::Int(1), false)]
    #[case::one_null_not_equal(SqlValue::from("a"), Operator::NotEquals, SqlValue::Null, true)]
    #[case::null_ordering(SqlValue::Null, Operator::LessThan, SqlValue::Int(1), false)]
    #[case::int_float(SqlValue::Int(2), Operator::GreaterThan, SqlValue::Float(1.5), true)]
    #[case::text(SqlValue::from("a"), Operator::LessThanOrEquals, SqlValue::from("b"), true)]
    #[case::in_list(SqlValue::Int(2), Operator::In, SqlValue::Array(vec![SqlValue::Int(1), SqlValue::Int(2)]), true)]
    #[case::not_in_list(SqlValue::Int(3), Operator::NotIn, SqlValue::Array(vec![SqlValue::Int(1)]), true)]
    fn compares_null_safely(
        #[case] lhs: SqlValue,
        #[case] op: Operator,
        #[case] rhs: SqlValue,
        #[case] expected: bool,
    ) {
        assert_eq!(compare(&lhs, op, &rhs).unwrap(), expected);
    }

    #[test]
    fn mismatched_kinds_are_an_error() {
        assert!(matches!(
            compare(&SqlValue::from("1"), Operator::Equals, &SqlValue::Int(1)),
            Err(CompileError::TypeMismatch(_))
        ));
    }

    #[test]
    fn evaluates_groups() {
        // (1 == 2 or true) and not false
        let cond = Condition::group(vec![vec![
            Condition::group(vec![
                vec![Condition::compare(Operand::Number(1), Operator::Equals, Operand::Number(2))],
                vec![Condition::value(Operand::Bool(true))],
            ]),
            Condition::negate(Condition::value(Operand::Bool(false))),
        ]]);
        assert!(Evaluator::new(&Literals).evaluate(&cond).unwrap());
    }

    #[test]
    fn decidability_depends_on_operands() {
        let schema = Schema {
            models: vec![],
            enums: vec![EnumDef { name: "Status".into(), values: vec!["Draft".into()] }],
        };
        let ctx_only = Condition::compare(Operand::ident("ctx.identity.email"), Operator::Equals, Operand::string("a@b.c"));
        let with_enum = Condition::compare(Operand::ident("Status.Draft"), Operator::Equals, Operand::string("Draft"));
        let with_field = Condition::compare(Operand::ident("post.author"), Operator::Equals, Operand::ident("ctx.identity"));
        assert!(is_statically_decidable(&ctx_only, &schema));
        assert!(is_statically_decidable(&with_enum, &schema));
        assert!(!is_statically_decidable(&with_field, &schema));
    }
}
