/// Errors that can occur during accounting log operations.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error("accounting database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row holds a value the current code cannot read back.
    #[error("corrupt accounting row {id}: {source}")]
    CorruptRow {
        id: i64,
        source: s2s_types::ParseError,
    },
}
