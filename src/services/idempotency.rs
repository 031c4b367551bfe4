use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, Set, SqlErr};
use tracing::debug;
use uuid::Uuid;

use crate::entities::idempotency_record::{self, Entity as IdempotencyRecord};
use crate::errors::ServiceError;

/// Longest key accepted from clients.
pub const MAX_KEY_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// This call stored the key.
    Recorded,
    /// Another writer stored the key first; here is what it points at.
    Exists(idempotency_record::Model),
}

/// Normalises and checks a client-supplied key.
pub fn validate_key(key: &str) -> Result<String, ServiceError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ServiceError::InvalidInput(
            "idempotency key must not be blank".to_string(),
        ));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(ServiceError::InvalidInput(format!(
            "idempotency key must be at most {} characters",
            MAX_KEY_LENGTH
        )));
    }
    Ok(key.to_string())
}

pub async fn find<C: ConnectionTrait>(
    conn: &C,
    key: &str,
) -> Result<Option<idempotency_record::Model>, DbErr> {
    IdempotencyRecord::find_by_id(key.to_string()).one(conn).await
}

/// Stores `key -> order_id`. Must run in the transaction that creates the order.
///
/// Uniqueness comes from the primary key; a violation means a concurrent
/// writer won, and its record is returned. Note that on PostgreSQL the
/// failed insert aborts the surrounding transaction, so callers that see
/// `Exists` must roll back rather than continue.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    key: &str,
    order_id: Uuid,
    customer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<IdempotencyOutcome, DbErr> {
    let insert = idempotency_record::ActiveModel {
        key: Set(key.to_string()),
        order_id: Set(order_id),
        customer_id: Set(customer_id),
        created_at: Set(now),
    }
    .insert(conn)
    .await;

    match insert {
        Ok(_) => Ok(IdempotencyOutcome::Recorded),
        Err(err) if is_unique_violation(&err) => {
            debug!(key, "idempotency key already recorded");
            match find(conn, key).await {
                Ok(Some(existing)) => Ok(IdempotencyOutcome::Exists(existing)),
                // Aborted transaction or record not yet visible; surface the original error.
                _ => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_trimmed_and_bounded() {
        assert_eq!(validate_key("  abc ").unwrap(), "abc");
        assert!(validate_key("   ").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
    }

    #[test]
    fn non_constraint_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&DbErr::Custom("boom".into())));
    }
}
