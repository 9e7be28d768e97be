use std::future::Future;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use sqlx::Database;

use crate::dialect::Dialect;
use crate::error::QuarryResult;
use crate::executor::{Execute, QueryOutput, SqlxExecutor};

/// A throwaway database behind a [`SqlxExecutor`], for tests.
#[derive(Debug, Clone)]
pub struct MockDatabase<DB: Database> {
    executor: SqlxExecutor<DB>,
}

impl<DB: Database> MockDatabase<DB> {
    /// Returns an executor sharing this database's pool.
    pub fn executor(&self) -> SqlxExecutor<DB> {
        self.executor.clone()
    }
}

#[cfg(feature = "sqlite")]
impl MockDatabase<sqlx::Sqlite> {
    /// Opens a private in-memory SQLite database.
    ///
    /// The pool holds a single connection: every in-memory connection is its own
    /// database.
    pub async fn new_sqlite() -> QuarryResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self {
            executor: SqlxExecutor::new(pool),
        })
    }
}

/// Wraps an executor and keeps every statement it runs, for counting round trips.
#[derive(Debug, Default)]
pub struct RecordingExecutor<E> {
    inner: E,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl<E> RecordingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Statements run so far, oldest first.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of statements whose text starts with `prefix` (case-insensitive).
    pub fn count_matching(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_uppercase();
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(sql, _)| sql.trim_start().to_ascii_uppercase().starts_with(&prefix))
            .count()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<E: Execute> Execute for RecordingExecutor<E> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((sql.to_owned(), params.to_vec()));
        self.inner.execute(sql, params)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_statements_in_order() {
        let db = MockDatabase::new_sqlite().await.unwrap();
        let exec = RecordingExecutor::new(db.executor());
        exec.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();
        exec.execute("INSERT INTO t (v) VALUES (?)", &[Value::from(1)])
            .await
            .unwrap();
        let out = exec.execute("select v from t", &[]).await.unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(exec.count_matching("select"), 1);
        assert_eq!(exec.statements()[1].1, vec![Value::from(1)]);
        exec.clear();
        assert!(exec.statements().is_empty());
    }
}
