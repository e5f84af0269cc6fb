use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};

use crate::config::AdvisoryLockStrategy;
use crate::error::ClosureTreeError;

/// Rejects backends whose SQL dialect the joined hierarchy queries do not cover.
pub(crate) fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), ClosureTreeError> {
    match conn.get_database_backend() {
        DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
        _ => Err(ClosureTreeError::UnsupportedBackend),
    }
}

/// A transaction that serializes structural mutations of one hierarchy.
///
/// On PostgreSQL a transaction-scoped advisory lock is taken right after
/// `BEGIN`; it is released by the server on commit or rollback. SQLite
/// already serializes writers, so no lock statement is issued there.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
}

impl LockedTransaction {
    pub async fn acquire(
        strategy: &AdvisoryLockStrategy,
        db: &DatabaseConnection,
    ) -> Result<Self, ClosureTreeError> {
        let txn = db.begin().await?;

        if let Some(key) = strategy.key() {
            if txn.get_database_backend() == DbBackend::Postgres {
                if let Err(err) = acquire_lock(&txn, key.as_str()).await {
                    let _ = txn.rollback().await;
                    return Err(err);
                }
            }
        }

        Ok(Self { txn })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ClosureTreeError> {
        self.txn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), ClosureTreeError> {
        self.txn.rollback().await?;
        Ok(())
    }

    /// Commits when `result` is `Ok`, rolls back otherwise, and hands the
    /// result back. A failed rollback never masks the original error.
    pub async fn finish<T>(
        self,
        result: Result<T, ClosureTreeError>,
    ) -> Result<T, ClosureTreeError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed mutation failed");
                }
                Err(err)
            }
        }
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosureTreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1))",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}
