//! Mutation hooks fired inside entity-store transactions
//!
//! Every write to a catalog entity notifies the registered hooks while the
//! write transaction is still open, so derived state (latest-episode
//! back-references, the feed invalidation token) commits atomically with it.

use rusqlite::{Connection, OptionalExtension, params};

use super::entity::EntityKind;
use crate::error::StoreError;

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Inserted,
    Updated,
    /// Cache stamps moved but the payload is byte-identical
    Touched,
    Deleted,
}

/// A single entity write, as seen by hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub entity_id: i64,
    pub kind: EntityKind,
    /// Parent show for episodes
    pub show_id: Option<i64>,
    /// Parent show before the write, when an episode moved between shows
    pub previous_show_id: Option<i64>,
    pub op: MutationOp,
}

impl Mutation {
    /// Whether the write changed anything a reader could observe
    pub fn changes_content(&self) -> bool {
        self.op != MutationOp::Touched
    }
}

/// Callback invoked synchronously for every entity mutation.
///
/// `conn` is the open write transaction; anything written through it commits
/// or rolls back together with the mutation itself.
pub trait MutationHook: Send + Sync {
    fn on_mutate(&self, conn: &Connection, mutation: &Mutation) -> Result<(), StoreError>;
}

/// Keeps each show's `latest_episode_id` in step with its episodes
#[derive(Debug, Default)]
pub struct LatestEpisodeHook;

impl MutationHook for LatestEpisodeHook {
    fn on_mutate(&self, conn: &Connection, mutation: &Mutation) -> Result<(), StoreError> {
        if mutation.kind != EntityKind::Episode || !mutation.changes_content() {
            return Ok(());
        }

        if let Some(show_id) = mutation.show_id {
            recompute_latest_episode(conn, show_id)?;
        }
        if let Some(previous) = mutation.previous_show_id {
            if Some(previous) != mutation.show_id {
                recompute_latest_episode(conn, previous)?;
            }
        }
        Ok(())
    }
}

/// Select a show's latest episode and write the back-reference.
///
/// Latest publish timestamp wins; episodes without one rank below dated ones.
/// Ties fall to the most recently created episode, then the highest local id,
/// so the choice is identical on every run.
pub fn recompute_latest_episode(
    conn: &Connection,
    show_id: i64,
) -> Result<Option<i64>, StoreError> {
    let latest: Option<i64> = conn
        .query_row(
            "SELECT id FROM catalog_entities
             WHERE show_id = ?1 AND kind = 'episode'
             ORDER BY published_at IS NULL, published_at DESC, created_at DESC, id DESC
             LIMIT 1",
            [show_id],
            |r| r.get(0),
        )
        .optional()?;

    conn.execute(
        "UPDATE catalog_entities SET latest_episode_id = ?2
         WHERE id = ?1 AND kind = 'show'",
        params![show_id, latest],
    )?;

    log::debug!("Latest episode for show {} is now {:?}", show_id, latest);
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(op: MutationOp, kind: EntityKind) -> Mutation {
        Mutation {
            entity_id: 1,
            kind,
            show_id: Some(10),
            previous_show_id: None,
            op,
        }
    }

    #[test]
    fn test_touched_does_not_change_content() {
        assert!(!mutation(MutationOp::Touched, EntityKind::Episode).changes_content());
        assert!(mutation(MutationOp::Inserted, EntityKind::Episode).changes_content());
        assert!(mutation(MutationOp::Deleted, EntityKind::Show).changes_content());
    }

    #[test]
    fn test_recompute_on_empty_show_clears_reference() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE catalog_entities (
                id INTEGER PRIMARY KEY, kind TEXT, show_id INTEGER,
                published_at INTEGER, created_at INTEGER, latest_episode_id INTEGER
             );
             INSERT INTO catalog_entities (id, kind, latest_episode_id) VALUES (10, 'show', 99);",
        )
        .unwrap();

        let latest = recompute_latest_episode(&conn, 10).unwrap();
        assert_eq!(latest, None);

        let stored: Option<i64> = conn
            .query_row(
                "SELECT latest_episode_id FROM catalog_entities WHERE id = 10",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(stored, None);
    }

    #[test]
    fn test_recompute_prefers_dated_episode_over_undated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE catalog_entities (
                id INTEGER PRIMARY KEY, kind TEXT, show_id INTEGER,
                published_at INTEGER, created_at INTEGER, latest_episode_id INTEGER
             );
             INSERT INTO catalog_entities (id, kind) VALUES (10, 'show');
             INSERT INTO catalog_entities (id, kind, show_id, published_at, created_at)
                VALUES (11, 'episode', 10, 1000, 1);
             INSERT INTO catalog_entities (id, kind, show_id, published_at, created_at)
                VALUES (12, 'episode', 10, NULL, 5);",
        )
        .unwrap();

        assert_eq!(recompute_latest_episode(&conn, 10).unwrap(), Some(11));
    }
}
