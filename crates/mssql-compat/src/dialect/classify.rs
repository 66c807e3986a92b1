//! Statement classification.

/// What the executor does with a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Entered through `query()`; returns rows.
    Read,
    /// Entered through `run()`; returns the affected row count.
    Write,
    /// An `INSERT` entered through `run()`; also returns the generated identity.
    Insert,
}

impl StatementKind {
    /// Classify a statement by its entry point and leading keyword.
    pub fn classify(sql: &str, via_run: bool) -> Self {
        if !via_run {
            return StatementKind::Read;
        }
        let head = sql.trim_start();
        let is_insert = head
            .get(..6)
            .is_some_and(|kw| kw.eq_ignore_ascii_case("insert"));
        if is_insert {
            StatementKind::Insert
        } else {
            StatementKind::Write
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, StatementKind::Write | StatementKind::Insert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Read => "read",
            StatementKind::Write => "write",
            StatementKind::Insert => "insert",
        }
    }
}
