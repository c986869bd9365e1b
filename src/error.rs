use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("store failure during {operation} on collection '{collection}': {source}")]
    StoreConnection {
        operation: &'static str,
        collection: String,
        #[source]
        source: Box<Error>,
    },

    #[error("corrupt row in collection '{collection}': {reason}")]
    CorruptRow { collection: String, reason: String },

    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    EmbeddingDimension { expected: usize, found: usize },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether this error comes from the storage backend rather than from
    /// the caller's input.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Redb(_)
                | Error::RedbDatabase(_)
                | Error::RedbStorage(_)
                | Error::RedbTransaction(_)
                | Error::RedbTable(_)
                | Error::RedbCommit(_)
                | Error::Json(_)
                | Error::CorruptRow { .. }
        )
    }

    /// Wrap a backend failure as [`Error::StoreConnection`]. Caller errors
    /// (missing collection, duplicate name, bad dimension) pass through.
    pub fn in_store(self, operation: &'static str, collection: &str) -> Self {
        if self.is_backend() {
            Error::StoreConnection {
                operation,
                collection: collection.to_string(),
                source: Box::new(self),
            }
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_wrapped() {
        let err = Error::Io(std::io::Error::other("disk gone"))
            .in_store("append", "KB1");
        match err {
            Error::StoreConnection {
                operation,
                collection,
                ..
            } => {
                assert_eq!(operation, "append");
                assert_eq!(collection, "KB1");
            }
            other => panic!("expected StoreConnection, got {other:?}"),
        }
    }

    #[test]
    fn caller_errors_pass_through() {
        let err = Error::DuplicateCollection("KB1".into())
            .in_store("create", "KB1");
        assert!(matches!(err, Error::DuplicateCollection(_)));

        let err = Error::NotFound {
            kind: "collection",
            name: "KB2".into(),
        }
        .in_store("append", "KB2");
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn store_connection_message_names_operation() {
        let err = Error::CorruptRow {
            collection: "KB1".into(),
            reason: "short header".into(),
        }
        .in_store("nearest", "KB1");
        let msg = err.to_string();
        assert!(msg.contains("nearest"));
        assert!(msg.contains("KB1"));
    }
}
