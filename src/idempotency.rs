//! Replay cache for mutating requests, keyed by (actor, client-supplied key).
//!
//! Nothing is locked between lookup and store, so a client that double-sends
//! before the first response lands may see the mutation run twice. The first
//! response stored is the one replayed afterwards.

use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::db::{Database, DbError, IdempotencyRecord};

pub const DEFAULT_TTL_HOURS: i64 = 24;
pub const MAX_KEY_LEN: usize = 255;

/// A finished response, replayed byte-for-byte on a cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: String,
}

pub struct IdempotencyCache {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { db, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Previously stored response for this key, if one is still live.
    pub fn check_or_reserve(&self, actor_id: &str, key: &str) -> Result<Option<CachedResponse>, DbError> {
        let record = self.db.get_idempotency_record(actor_id, key, self.clock.now())?;
        Ok(record.map(|r| CachedResponse {
            status_code: r.status_code,
            body: r.body,
        }))
    }

    /// Record the response for a completed mutation. Returns false if another
    /// request with the same key stored its response first.
    pub fn store(&self, actor_id: &str, key: &str, response: &CachedResponse) -> Result<bool, DbError> {
        let now = self.clock.now();
        let stored = self.db.insert_idempotency_record(&IdempotencyRecord {
            actor_id: actor_id.to_string(),
            idempotency_key: key.to_string(),
            status_code: response.status_code,
            body: response.body.clone(),
            created_at: now,
            expires_at: now + self.ttl,
        })?;

        if !stored {
            tracing::debug!("Idempotency key {} for {} already stored", key, actor_id);
        }
        Ok(stored)
    }

    pub fn purge_expired(&self) -> Result<usize, DbError> {
        let purged = self.db.purge_idempotency_records(self.clock.now())?;
        if purged > 0 {
            tracing::info!("Purged {} expired idempotency record(s)", purged);
        }
        Ok(purged)
    }
}
