//! Source-to-target pattern rewriting.
//!
//! Each rule is a pure function over the statement text. The [`Rewriter`]
//! holds them in a fixed order and records the parameter effect of every rule
//! that fired, so the reindexer can keep positional bindings consistent with
//! the rewritten text.
//!
//! | # | Source                   | Target                                   | Effect                |
//! |---|--------------------------|------------------------------------------|-----------------------|
//! | 1 | `LIMIT ? OFFSET ?` (tail) | `OFFSET ? ROWS FETCH NEXT ? ROWS ONLY`   | `SwapLastTwo`         |
//! | 2 | `LIMIT a OFFSET b`        | `OFFSET b ROWS FETCH NEXT a ROWS ONLY`   | none                  |
//! | 3 | `SELECT … LIMIT n` (tail) | `SELECT TOP(n) …`                        | `DropTrailingLiteral` |
//! | 4 | `RANDOM()`                | `NEWID()`                                | none                  |
//! | 5 | `datetime("now")`, `CURRENT_TIMESTAMP` | `GETUTCDATE()`              | none                  |
//!
//! Rules 4 and 5 leave string literals and comments untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::scan::mask;

/// How a fired rule changes the positional parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEffect {
    /// The final two parameters are `[limit, offset]` and must become `[offset, limit]`.
    SwapLastTwo,
    /// A literal `LIMIT n` was moved into `TOP(n)`; no bound value is involved.
    DropTrailingLiteral,
}

static LIMIT_OFFSET_PARAMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+\?\s+OFFSET\s+\?(\s*;?\s*)$").expect("limit/offset placeholder regex")
});

static LIMIT_OFFSET_LITERALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\d+)\s+OFFSET\s+(\d+)\b").expect("limit/offset literal regex")
});

static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\bLIMIT\s+(\d+)\s*(;?)\s*$").expect("trailing limit regex")
});

static LEADING_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*SELECT(?:\s+DISTINCT)?\b").expect("leading select regex")
});

static RANDOM_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bRANDOM\s*\(\s*\)").expect("random regex"));

static DATETIME_NOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bdatetime\s*\(\s*['"]now['"]\s*\)"#).expect("datetime now regex")
});

static CURRENT_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCURRENT_TIMESTAMP\b").expect("current timestamp regex"));

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("order by regex"));

/// SQL Server only accepts `OFFSET … FETCH` after an `ORDER BY`.
fn ordering_prefix(sql: &str) -> &'static str {
    if has_outer_order_by(sql) {
        ""
    } else {
        "ORDER BY (SELECT NULL) "
    }
}

/// An `ORDER BY` at parenthesis depth zero. Window clauses and subqueries do
/// not order the outer statement.
fn has_outer_order_by(sql: &str) -> bool {
    let masked = mask(sql);
    let mut depth = 0i32;
    let mut scanned = 0;
    for m in ORDER_BY.find_iter(&masked) {
        depth += paren_delta(&masked[scanned..m.start()]);
        scanned = m.start();
        if depth == 0 {
            return true;
        }
    }
    false
}

fn paren_delta(text: &str) -> i32 {
    text.bytes()
        .map(|b| match b {
            b'(' => 1,
            b')' => -1,
            _ => 0,
        })
        .sum()
}

/// Replace every match of `re` that starts in code, leaving literals,
/// quoted identifiers and comments intact.
fn replace_in_code(sql: &str, re: &Regex, replacement: &str) -> Option<String> {
    let masked = mask(sql);
    let code = masked.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut replaced = false;
    for m in re.find_iter(sql) {
        if code[m.start()] == b' ' {
            continue;
        }
        out.push_str(&sql[copied..m.start()]);
        out.push_str(replacement);
        copied = m.end();
        replaced = true;
    }
    if !replaced {
        return None;
    }
    out.push_str(&sql[copied..]);
    Some(out)
}

/// Rule 1: `LIMIT ? OFFSET ?` at the end of the statement.
pub fn paginate_placeholders(sql: &str) -> Option<String> {
    let caps = LIMIT_OFFSET_PARAMS.captures(sql)?;
    let start = caps.get(0)?.start();
    let head = sql[..start].trim_end();
    let tail = caps.get(1).map_or("", |m| m.as_str());

    Some(format!(
        "{} {}OFFSET ? ROWS FETCH NEXT ? ROWS ONLY{}",
        head,
        ordering_prefix(head),
        tail
    ))
}

/// Rule 2: `LIMIT <a> OFFSET <b>` with literal integers, anywhere in the text.
pub fn paginate_literals(sql: &str) -> Option<String> {
    if !LIMIT_OFFSET_LITERALS.is_match(sql) {
        return None;
    }
    let order = ordering_prefix(sql);
    let rewritten = LIMIT_OFFSET_LITERALS.replace_all(sql, |caps: &Captures| {
        format!(
            "{}OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            order, &caps[2], &caps[1]
        )
    });
    Some(rewritten.into_owned())
}

/// Rule 3: trailing `LIMIT <n>` becomes `TOP(<n>)` on the statement's leading `SELECT`.
///
/// Statements that do not start with `SELECT` are left alone.
pub fn trailing_limit_to_top(sql: &str) -> Option<String> {
    let limit = TRAILING_LIMIT.captures(sql)?;
    let select = LEADING_SELECT.find(sql)?;
    let limit_match = limit.get(0)?;
    if limit_match.start() < select.end() {
        return None;
    }

    let count = &limit[1];
    let terminator = &limit[2];
    Some(format!(
        "{} TOP({}){}{}",
        &sql[..select.end()],
        count,
        &sql[select.end()..limit_match.start()],
        terminator
    ))
}

/// Rule 4: `RANDOM()` becomes `NEWID()`.
pub fn random_to_newid(sql: &str) -> Option<String> {
    replace_in_code(sql, &RANDOM_FN, "NEWID()")
}

/// Rule 5: `datetime("now")` and `CURRENT_TIMESTAMP` become `GETUTCDATE()`.
pub fn now_to_getutcdate(sql: &str) -> Option<String> {
    let first = replace_in_code(sql, &DATETIME_NOW, "GETUTCDATE()");
    let text = first.as_deref().unwrap_or(sql);
    replace_in_code(text, &CURRENT_TIMESTAMP, "GETUTCDATE()").or(first)
}

/// A named rewrite step.
#[derive(Clone, Copy)]
pub struct RewriteRule {
    pub name: &'static str,
    pub effect: Option<ParamEffect>,
    apply: fn(&str) -> Option<String>,
}

impl RewriteRule {
    pub const fn new(
        name: &'static str,
        effect: Option<ParamEffect>,
        apply: fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            name,
            effect,
            apply,
        }
    }

    /// Apply the rule; `None` when its pattern does not occur.
    pub fn apply(&self, sql: &str) -> Option<(String, Option<ParamEffect>)> {
        (self.apply)(sql).map(|text| (text, self.effect))
    }
}

impl std::fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteRule")
            .field("name", &self.name)
            .field("effect", &self.effect)
            .finish()
    }
}

/// The standard rule list. Pagination must precede the trailing-limit rule.
pub const STANDARD_RULES: [RewriteRule; 5] = [
    RewriteRule::new(
        "pagination_placeholders",
        Some(ParamEffect::SwapLastTwo),
        paginate_placeholders,
    ),
    RewriteRule::new("pagination_literals", None, paginate_literals),
    RewriteRule::new(
        "trailing_limit",
        Some(ParamEffect::DropTrailingLiteral),
        trailing_limit_to_top,
    ),
    RewriteRule::new("random", None, random_to_newid),
    RewriteRule::new("utc_now", None, now_to_getutcdate),
];

/// Output of [`Rewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    /// Effects of the rules that fired, in firing order.
    pub effects: Vec<ParamEffect>,
}

impl Rewritten {
    pub fn has_effect(&self, effect: ParamEffect) -> bool {
        self.effects.contains(&effect)
    }
}

/// Ordered rewrite pipeline.
#[derive(Debug, Clone)]
pub struct Rewriter {
    rules: Vec<RewriteRule>,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::standard()
    }
}

impl Rewriter {
    /// Pipeline with [`STANDARD_RULES`].
    pub fn standard() -> Self {
        Self {
            rules: STANDARD_RULES.to_vec(),
        }
    }

    /// Pipeline with a caller-supplied rule order.
    pub fn with_rules(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Run every rule in order; each sees the previous rule's output.
    pub fn rewrite(&self, sql: &str) -> Rewritten {
        let mut text = sql.to_string();
        let mut effects = Vec::new();

        for rule in &self.rules {
            if let Some((next, effect)) = rule.apply(&text) {
                tracing::trace!(rule = rule.name, "rewrite rule fired");
                text = next;
                if let Some(effect) = effect {
                    effects.push(effect);
                }
            }
        }

        Rewritten { text, effects }
    }
}
