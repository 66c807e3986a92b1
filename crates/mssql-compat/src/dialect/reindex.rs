//! Parameter reordering and target-type coercion.

use tracing::warn;

use super::classify::StatementKind;
use super::rewrite::ParamEffect;
use crate::core::Scalar;

/// Fallback values for unusable pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationDefaults {
    pub limit: i64,
    pub offset: i64,
}

impl Default for PaginationDefaults {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

/// Reorder `params` to match the rewritten text and coerce values the target
/// engine has no native type for.
///
/// `SwapLastTwo` turns the trailing `[limit, offset]` into `[offset, limit]`,
/// each parsed to a non-negative integer or replaced by its default.
/// Booleans always become bits; `"true"`/`"false"` text becomes a bit for
/// write statements.
pub fn reindex(
    params: &[Scalar],
    effects: &[ParamEffect],
    kind: StatementKind,
    defaults: PaginationDefaults,
) -> Vec<Scalar> {
    let mut out = params.to_vec();

    if effects.contains(&ParamEffect::SwapLastTwo) {
        let n = out.len();
        if n >= 2 {
            let limit = pagination_value(&out[n - 2], defaults.limit, "limit");
            let offset = pagination_value(&out[n - 1], defaults.offset, "offset");
            out[n - 2] = Scalar::Int(offset);
            out[n - 1] = Scalar::Int(limit);
        }
    }

    for value in out.iter_mut() {
        if let Some(bit) = as_bit(value, kind) {
            *value = Scalar::Int(bit);
        }
    }

    out
}

/// Parse a pagination value, falling back to `default` when it is not a
/// non-negative integer.
fn pagination_value(value: &Scalar, default: i64, position: &'static str) -> i64 {
    let parsed = match value {
        Scalar::Int(v) => Some(*v),
        Scalar::Float(v) if v.is_finite() => Some(v.trunc() as i64),
        Scalar::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
        }
        _ => None,
    };

    match parsed {
        Some(v) if v >= 0 => v,
        _ => {
            warn!(
                position,
                value = %value,
                fallback = default,
                "invalid pagination value, using default"
            );
            default
        }
    }
}

fn as_bit(value: &Scalar, kind: StatementKind) -> Option<i64> {
    match value {
        Scalar::Bool(b) => Some(i64::from(*b)),
        Scalar::Text(s) if kind.is_write() => {
            if s.eq_ignore_ascii_case("true") {
                Some(1)
            } else if s.eq_ignore_ascii_case("false") {
                Some(0)
            } else {
                None
            }
        }
        _ => None,
    }
}
