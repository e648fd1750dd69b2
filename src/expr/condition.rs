//! Condition trees as produced by the expression parser.
//!
//! The parser emits one `Or` node per parenthesized group (the whole expression is one
//! group), whose children are `And` nodes. Compilers must keep that shape: it is what
//! decides where parentheses go in generated SQL.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    /// Dotted identifier path, e.g. `["thing", "parent", "name"]` or `["ctx", "identity"]`.
    Ident(Vec<String>),
    String(String),
    Number(i64),
    Decimal(f64),
    Bool(bool),
    Null,
    Array(Vec<Operand>),
}

impl Operand {
    /// Build an identifier from dotted source text: `Operand::ident("thing.parent.name")`.
    pub fn ident(path: &str) -> Self {
        Operand::Ident(path.split('.').map(str::to_string).collect())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Operand::String(s.into())
    }

    pub fn as_ident(&self) -> Option<&[String]> {
        match self {
            Operand::Ident(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        match self {
            Operand::Ident(_) => false,
            Operand::Array(items) => items.iter().all(Operand::is_literal),
            _ => true,
        }
    }

    pub fn is_context(&self) -> bool {
        matches!(self, Operand::Ident(path) if path.first().map(String::as_str) == Some("ctx"))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Ident(path) => write!(f, "{}", path.join(".")),
            Operand::String(s) => write!(f, "{:?}", s),
            Operand::Number(n) => write!(f, "{}", n),
            Operand::Decimal(n) => write!(f, "{}", n),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Null => write!(f, "null"),
            Operand::Array(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEquals,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEquals,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "=")]
    Assign,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEquals => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEquals => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Assign => "=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A leaf: `lhs OP rhs`, or a lone operand that must be boolean.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub lhs: Operand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Operand>,
}

impl Comparison {
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        std::iter::once(&self.lhs).chain(self.rhs.iter())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Leaf(Comparison),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn compare(lhs: Operand, operator: Operator, rhs: Operand) -> Self {
        Condition::Leaf(Comparison {
            lhs,
            operator: Some(operator),
            rhs: Some(rhs),
        })
    }

    pub fn value(operand: Operand) -> Self {
        Condition::Leaf(Comparison {
            lhs: operand,
            operator: None,
            rhs: None,
        })
    }

    /// One parenthesized group in parser shape: an `Or` of `And`s.
    /// `a and b or c` is `Condition::group(vec![vec![a, b], vec![c]])`.
    pub fn group(alternatives: Vec<Vec<Condition>>) -> Self {
        Condition::Or(alternatives.into_iter().map(Condition::And).collect())
    }

    pub fn negate(inner: Condition) -> Self {
        Condition::Not(Box::new(inner))
    }

    /// Walk the tree bottom-up with `visitor`.
    pub fn accept<V: ConditionVisitor>(&self, visitor: &mut V) -> Result<V::Output, V::Error> {
        match self {
            Condition::Leaf(leaf) => visitor.visit_leaf(leaf),
            Condition::And(terms) => {
                let out = terms
                    .iter()
                    .map(|t| t.accept(visitor))
                    .collect::<Result<Vec<_>, _>>()?;
                visitor.visit_and(out)
            }
            Condition::Or(terms) => {
                let out = terms
                    .iter()
                    .map(|t| t.accept(visitor))
                    .collect::<Result<Vec<_>, _>>()?;
                visitor.visit_or(out)
            }
            Condition::Not(inner) => {
                let out = inner.accept(visitor)?;
                visitor.visit_not(out)
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self.accept(&mut LeafCounter) {
            Ok(n) => n,
            Err(never) => match never {},
        }
    }
}

/// Visitor over a condition tree. Children are visited before their parent, so a visitor
/// only combines already-produced outputs.
pub trait ConditionVisitor {
    type Output;
    type Error;

    fn visit_leaf(&mut self, leaf: &Comparison) -> Result<Self::Output, Self::Error>;
    fn visit_and(&mut self, terms: Vec<Self::Output>) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, terms: Vec<Self::Output>) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, inner: Self::Output) -> Result<Self::Output, Self::Error>;
}

struct LeafCounter;

impl ConditionVisitor for LeafCounter {
    type Output = usize;
    type Error = std::convert::Infallible;

    fn visit_leaf(&mut self, _: &Comparison) -> Result<usize, Self::Error> {
        Ok(1)
    }

    fn visit_and(&mut self, terms: Vec<usize>) -> Result<usize, Self::Error> {
        Ok(terms.into_iter().sum())
    }

    fn visit_or(&mut self, terms: Vec<usize>) -> Result<usize, Self::Error> {
        Ok(terms.into_iter().sum())
    }

    fn visit_not(&mut self, inner: usize) -> Result<usize, Self::Error> {
        Ok(inner)
    }
}

/// `@set` assignment: `lhs = rhs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub lhs: Vec<String>,
    pub rhs: Operand,
}

impl Assignment {
    pub fn new(lhs: &str, rhs: Operand) -> Self {
        Assignment {
            lhs: lhs.split('.').map(str::to_string).collect(),
            rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_parser_output() {
        let json = r#"{"or":[{"and":[
            {"leaf":{"lhs":{"ident":["post","title"]},"operator":"==","rhs":{"string":"x"}}},
            {"leaf":{"lhs":{"ident":["ctx","isAuthenticated"]}}}
        ]}]}"#;
        let cond: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(
            cond,
            Condition::group(vec![vec![
                Condition::compare(Operand::ident("post.title"), Operator::Equals, Operand::string("x")),
                Condition::value(Operand::ident("ctx.isAuthenticated")),
            ]])
        );
        assert_eq!(cond.leaf_count(), 2);
    }

    #[test]
    fn not_in_operator_uses_source_spelling() {
        let op: Operator = serde_json::from_str(r#""not in""#).unwrap();
        assert_eq!(op, Operator::NotIn);
        assert_eq!(op.to_string(), "not in");
    }

    #[test]
    fn arrays_of_literals_are_literals() {
        assert!(Operand::Array(vec![Operand::Number(1), Operand::Null]).is_literal());
        assert!(!Operand::Array(vec![Operand::ident("post.id")]).is_literal());
        assert!(Operand::ident("ctx.now").is_context());
    }
}
