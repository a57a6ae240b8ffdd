//! # Budget Repository
//!
//! The single-row remaining token balance. A missing row reads as
//! [`DEFAULT_TOKEN_BALANCE`].

use chrono::Utc;
use sibling_core::DEFAULT_TOKEN_BALANCE;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Repository for the token budget.
#[derive(Debug, Clone)]
pub struct BudgetRepository {
    pool: SqlitePool,
}

impl BudgetRepository {
    /// Creates a new BudgetRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BudgetRepository { pool }
    }

    /// Current balance.
    pub async fn balance(&self) -> DbResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM token_budget WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(balance.unwrap_or(DEFAULT_TOKEN_BALANCE))
    }

    /// Overwrites the balance.
    pub async fn set_balance(&self, balance: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO token_budget (id, balance, updated_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at
            "#,
        )
        .bind(balance)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deducts `amount` tokens and returns the remaining balance.
    ///
    /// The check and the deduction are one statement, so concurrent spends
    /// never take the balance below zero. Non-positive amounts are a no-op.
    ///
    /// ## Errors
    /// `DbError::BudgetExhausted` if the balance is smaller than `amount`.
    pub async fn spend(&self, amount: i64) -> DbResult<i64> {
        if amount <= 0 {
            return self.balance().await;
        }

        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT OR IGNORE INTO token_budget (id, balance, updated_at) VALUES (1, ?1, ?2)",
        )
        .bind(DEFAULT_TOKEN_BALANCE)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE token_budget SET
                balance = balance - ?1,
                updated_at = ?2
            WHERE id = 1 AND balance >= ?1
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match remaining {
            Some(remaining) => {
                debug!(amount, remaining, "Tokens spent");
                Ok(remaining)
            }
            None => {
                let balance = self.balance().await?;
                warn!(amount, balance, "Token budget exhausted");
                Err(DbError::BudgetExhausted {
                    balance,
                    requested: amount,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    use super::*;

    #[tokio::test]
    async fn test_default_balance() {
        let repo = Database::new(DbConfig::in_memory()).await.unwrap().budget();
        assert_eq!(repo.balance().await.unwrap(), DEFAULT_TOKEN_BALANCE);
    }

    #[tokio::test]
    async fn test_spend_until_exhausted() {
        let repo = Database::new(DbConfig::in_memory()).await.unwrap().budget();
        repo.set_balance(100).await.unwrap();

        assert_eq!(repo.spend(60).await.unwrap(), 40);
        assert_eq!(repo.spend(0).await.unwrap(), 40);

        let err = repo.spend(50).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::BudgetExhausted {
                balance: 40,
                requested: 50
            }
        ));
        assert_eq!(repo.balance().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_first_spend_starts_from_default() {
        let repo = Database::new(DbConfig::in_memory()).await.unwrap().budget();
        assert_eq!(repo.spend(1).await.unwrap(), DEFAULT_TOKEN_BALANCE - 1);
    }
}
