//! Positional-to-named placeholder binding.

use super::scan::mask;
use crate::core::Scalar;
use crate::error::{CompatError, Result};

/// Name of the `index`-th bound parameter (zero-based), without the `@` sigil.
pub fn param_name(index: usize) -> String {
    format!("param{}", index)
}

/// A named parameter and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Scalar,
}

/// Statement text with only named tokens and the values for those tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub text: String,
    /// One entry per `@name` token in `text`, in token order.
    pub bindings: Vec<Binding>,
}

impl BoundQuery {
    /// A statement with no parameters.
    pub fn unbound(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bindings: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Scalar> {
        self.bindings.iter().map(|b| &b.value)
    }
}

/// Byte offsets of every `?` placeholder outside literals, quoted or
/// bracketed identifiers and comments.
pub fn placeholder_positions(sql: &str) -> Vec<usize> {
    mask(sql)
        .match_indices('?')
        .map(|(idx, _)| idx)
        .collect()
}

/// Replace the i-th `?` with `@param{i}` and bind `params[i]` to it.
///
/// A count mismatch is a bug in the calling statement and is reported rather
/// than padded or truncated.
pub fn bind(sql: &str, params: Vec<Scalar>) -> Result<BoundQuery> {
    let positions = placeholder_positions(sql);
    if positions.len() != params.len() {
        return Err(CompatError::RewriteMismatch {
            placeholders: positions.len(),
            params: params.len(),
        });
    }

    let mut text = String::with_capacity(sql.len() + positions.len() * 8);
    let mut bindings = Vec::with_capacity(params.len());
    let mut last = 0;

    for (i, (pos, value)) in positions.into_iter().zip(params).enumerate() {
        let name = param_name(i);
        text.push_str(&sql[last..pos]);
        text.push('@');
        text.push_str(&name);
        last = pos + 1;
        bindings.push(Binding { name, value });
    }
    text.push_str(&sql[last..]);

    Ok(BoundQuery { text, bindings })
}
