//! Source → target SQL dialect translation.
//!
//! Application statements are written once with positional `?` parameters,
//! `LIMIT`/`OFFSET` pagination, `RANDOM()` and `datetime("now")`. Before they
//! reach SQL Server they pass through three pure stages:
//!
//! 1. [`rewrite`]: pattern rewriting ([`Rewriter`])
//! 2. [`reindex`]: parameter reordering and bit coercion
//! 3. [`bind`]: `?` → `@paramN` naming
//!
//! [`Translator`] composes the three.
//!
//! ```rust
//! use mssql_compat::dialect::{StatementKind, Translator};
//! use mssql_compat::Scalar;
//!
//! let t = Translator::default();
//! let out = t
//!     .translate(
//!         "SELECT * FROM stories ORDER BY createdAt DESC LIMIT ? OFFSET ?",
//!         &[Scalar::Int(10), Scalar::Int(0)],
//!         StatementKind::Read,
//!     )
//!     .unwrap();
//! assert!(out.bound.text.ends_with("OFFSET @param0 ROWS FETCH NEXT @param1 ROWS ONLY"));
//! ```

mod bind;
mod classify;
mod reindex;
mod rewrite;
mod scan;

pub use bind::{bind, param_name, placeholder_positions, Binding, BoundQuery};
pub use classify::StatementKind;
pub use reindex::{reindex, PaginationDefaults};
pub use rewrite::{
    now_to_getutcdate, paginate_literals, paginate_placeholders, random_to_newid,
    trailing_limit_to_top, ParamEffect, RewriteRule, Rewriter, Rewritten, STANDARD_RULES,
};

use tracing::debug;

use crate::core::Scalar;
use crate::error::Result;

/// Result of running a statement through the full pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub kind: StatementKind,
    pub effects: Vec<ParamEffect>,
    pub bound: BoundQuery,
}

/// Rewriter, reindexer and binder composed in order.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    rewriter: Rewriter,
    defaults: PaginationDefaults,
}

impl Translator {
    pub fn new(rewriter: Rewriter, defaults: PaginationDefaults) -> Self {
        Self { rewriter, defaults }
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    pub fn defaults(&self) -> PaginationDefaults {
        self.defaults
    }

    /// Translate a source-dialect statement and its positional parameters.
    pub fn translate(
        &self,
        sql: &str,
        params: &[Scalar],
        kind: StatementKind,
    ) -> Result<Translation> {
        let rewritten = self.rewriter.rewrite(sql);
        let reordered = reindex(params, &rewritten.effects, kind, self.defaults);
        let bound = bind(&rewritten.text, reordered)?;

        debug!(
            kind = kind.as_str(),
            effects = ?rewritten.effects,
            params = bound.bindings.len(),
            "translated statement"
        );

        Ok(Translation {
            kind,
            effects: rewritten.effects,
            bound,
        })
    }
}
