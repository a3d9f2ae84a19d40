//! Global invalidation signal for derived feed aggregates
//!
//! A single monotonically increasing token. Any content write to a catalog
//! entity bumps it; readers compare it with the token they last saw and
//! recompute their aggregate when the two differ.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::fmt;

use crate::error::{Result, StoreError};
use crate::store::{Database, Mutation, MutationHook, from_millis, now_millis};

/// Point in the write history. Tokens are totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Token(i64);

impl Token {
    /// Token before any write has been observed
    pub const ZERO: Token = Token(0);

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token with the time it last moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalSnapshot {
    pub token: Token,
    pub updated_at: DateTime<Utc>,
}

/// Handle to the singleton signal row
#[derive(Clone)]
pub struct InvalidationSignal {
    db: Database,
}

impl InvalidationSignal {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Advance the token. Safe to call any number of times per write.
    pub fn bump(&self) -> Result<Token> {
        let conn = self.db.lock()?;
        Ok(bump_on(&conn)?)
    }

    pub fn current_token(&self) -> Result<Token> {
        Ok(self.snapshot()?.token)
    }

    /// Whether a reader holding `last_seen` must discard its aggregate
    pub fn is_stale(&self, last_seen: Token) -> Result<bool> {
        Ok(self.current_token()? != last_seen)
    }

    pub fn snapshot(&self) -> Result<SignalSnapshot> {
        let conn = self.db.lock()?;
        let (token, updated_at): (i64, i64) = conn
            .query_row(
                "SELECT version_token, updated_at FROM invalidation_signal WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(StoreError::from)?;
        Ok(SignalSnapshot {
            token: Token(token),
            updated_at: from_millis(updated_at),
        })
    }
}

fn bump_on(conn: &Connection) -> std::result::Result<Token, StoreError> {
    let token = conn.query_row(
        "UPDATE invalidation_signal
         SET version_token = version_token + 1, updated_at = ?1
         WHERE id = 1
         RETURNING version_token",
        [now_millis()],
        |r| r.get(0),
    )?;
    log::debug!("Invalidation token bumped to {}", token);
    Ok(Token(token))
}

impl MutationHook for InvalidationSignal {
    fn on_mutate(&self, conn: &Connection, mutation: &Mutation) -> std::result::Result<(), StoreError> {
        if mutation.changes_content() {
            bump_on(conn)?;
        }
        Ok(())
    }
}

/// A reader's derived aggregate, tagged with the token it was computed at
pub struct FeedView<T> {
    value: Option<T>,
    last_seen: Token,
}

impl<T> Default for FeedView<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_seen: Token::ZERO,
        }
    }
}

impl<T> FeedView<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> Token {
        self.last_seen
    }

    /// Return the held aggregate, recomputing it first if the signal moved.
    ///
    /// The token is read before `compute` runs, so a write that lands during
    /// the recompute leaves the view stale for the next call.
    pub fn get_or_recompute<F>(&mut self, signal: &InvalidationSignal, compute: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        let token = signal.current_token()?;
        let value = match self.value.take() {
            Some(value) if token == self.last_seen => value,
            _ => {
                log::debug!("Feed aggregate stale ({} -> {}), recomputing", self.last_seen, token);
                let fresh = compute()?;
                self.last_seen = token;
                fresh
            }
        };
        Ok(&*self.value.insert(value))
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CatalogPayload, EntityStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn signal() -> InvalidationSignal {
        InvalidationSignal::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_bump_is_monotonic() {
        let signal = signal();
        let a = signal.bump().unwrap();
        let b = signal.bump().unwrap();
        assert!(b > a);
        assert_eq!(signal.current_token().unwrap(), b);
    }

    #[test]
    fn test_many_bumps_look_like_one() {
        let signal = signal();
        let seen = signal.current_token().unwrap();

        signal.bump().unwrap();
        let once = signal.is_stale(seen).unwrap();

        for _ in 0..5 {
            signal.bump().unwrap();
        }
        let many = signal.is_stale(seen).unwrap();
        assert_eq!(once, many);
        assert!(many);

        // Reading the token again clears staleness
        let seen = signal.current_token().unwrap();
        assert!(!signal.is_stale(seen).unwrap());
    }

    #[test]
    fn test_entity_writes_bump_through_hook() {
        let db = Database::open_in_memory().unwrap();
        let signal = InvalidationSignal::new(db.clone());
        let store = EntityStore::new(db).with_hook(Arc::new(signal.clone()));
        let ttl = Duration::from_secs(60);

        let before = signal.current_token().unwrap();
        store.upsert("show-1", &CatalogPayload::show("Show"), ttl).unwrap();
        let after_insert = signal.current_token().unwrap();
        assert!(after_insert > before);

        // Identical payload is a touch, not a content change
        store.upsert("show-1", &CatalogPayload::show("Show"), ttl).unwrap();
        assert_eq!(signal.current_token().unwrap(), after_insert);
    }

    #[test]
    fn test_failed_write_does_not_bump() {
        let db = Database::open_in_memory().unwrap();
        let signal = InvalidationSignal::new(db.clone());
        let store = EntityStore::new(db).with_hook(Arc::new(signal.clone()));

        let before = signal.current_token().unwrap();
        let _ = store.upsert(
            "ep-1",
            &CatalogPayload::episode("Orphan", "no-such-show"),
            Duration::from_secs(60),
        );
        assert_eq!(signal.current_token().unwrap(), before);
    }

    #[test]
    fn test_feed_view_recomputes_only_on_change() {
        let signal = signal();
        let mut view = FeedView::new();
        let mut computes = 0;

        for _ in 0..3 {
            view.get_or_recompute(&signal, || {
                computes += 1;
                Ok(vec!["post"])
            })
            .unwrap();
        }
        assert_eq!(computes, 1);

        signal.bump().unwrap();
        let value = view
            .get_or_recompute(&signal, || {
                computes += 1;
                Ok(vec!["post", "new"])
            })
            .unwrap();
        assert_eq!(value.len(), 2);
        assert_eq!(computes, 2);
    }
}
