//! Rendered statements and the `?` to `$n` rewrite for PostgreSQL.

use crate::sql::SqlValue;

/// Rendered SQL with positional `?` placeholders and one argument per placeholder,
/// left to right. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    template: String,
    args: Vec<SqlValue>,
}

impl Statement {
    pub fn new(template: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Statement {
            template: template.into(),
            args,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn args(&self) -> &[SqlValue] {
        &self.args
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.template, self.args)
    }

    /// Placeholders outside quoted identifiers.
    pub fn placeholder_count(&self) -> usize {
        let mut in_quotes = false;
        let mut count = 0;
        for c in self.template.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                '?' if !in_quotes => count += 1,
                _ => {}
            }
        }
        count
    }

    /// Rewrite `?` placeholders to PostgreSQL's `$1, $2, ...`.
    pub fn to_positional(&self) -> String {
        let mut out = String::with_capacity(self.template.len() + 8);
        let mut in_quotes = false;
        let mut n = 0;
        for c in self.template.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    out.push(c);
                }
                '?' if !in_quotes => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                _ => out.push(c),
            }
        }
        out
    }
}
