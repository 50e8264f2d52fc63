use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::TicketEngine;
use crate::clock::ManualClock;
use crate::db::{Actor, CreateUser, Database, Role};
use crate::idempotency::{IdempotencyCache, DEFAULT_TTL_HOURS};

/// In-memory engine with a manual clock and one user of each kind.
pub(crate) struct Harness {
    pub db: Arc<Database>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<TicketEngine>,
    pub start: DateTime<Utc>,
    pub admin: Actor,
    pub agent: Actor,
    pub agent2: Actor,
    pub user: Actor,
    pub other_user: Actor,
}

impl Harness {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(start));
        let idempotency = Arc::new(IdempotencyCache::new(
            db.clone(),
            clock.clone(),
            Duration::hours(DEFAULT_TTL_HOURS),
        ));
        let engine = Arc::new(TicketEngine::new(db.clone(), clock.clone(), idempotency));

        let add = |name: &str, email: &str, role: Role| -> Actor {
            let issued = db
                .create_user(&CreateUser {
                    name: name.to_string(),
                    email: email.to_string(),
                    role,
                }, start)
                .unwrap();
            Actor::from(&issued.user)
        };

        let admin = add("Ada Admin", "ada@example.com", Role::Admin);
        let agent = add("Alan Agent", "alan@example.com", Role::Agent);
        let agent2 = add("Barbara Agent", "barbara@example.com", Role::Agent);
        let user = add("Uma User", "uma@example.com", Role::User);
        let other_user = add("Oscar User", "oscar@example.com", Role::User);

        Self {
            db,
            clock,
            engine,
            start,
            admin,
            agent,
            agent2,
            user,
            other_user,
        }
    }
}
