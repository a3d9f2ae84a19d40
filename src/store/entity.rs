//! Catalog entities (shows and episodes) and their cache bookkeeping

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::hooks::{self, LatestEpisodeHook, Mutation, MutationHook, MutationOp};
use super::{Database, duration_millis, from_millis, now_millis};
use crate::error::{Error, Result, StoreError};

/// Show or episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Show,
    Episode,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Show => "show",
            EntityKind::Episode => "episode",
        }
    }
}

/// Who, if anyone, owns a record outside the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    #[default]
    #[serde(rename = "none")]
    Unowned,
    Claimed,
    Curated,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Unowned => "none",
            OwnerKind::Claimed => "claimed",
            OwnerKind::Curated => "curated",
        }
    }

    pub fn is_owned(&self) -> bool {
        *self != OwnerKind::Unowned
    }
}

/// Stored cache state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Permanent,
    Cached,
    Stale,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Permanent => "permanent",
            CacheState::Cached => "cached",
            CacheState::Stale => "stale",
        }
    }
}

macro_rules! sql_text_enum {
    ($ty:ty, $label:literal, [$($variant:expr),+]) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == text)
                    .ok_or_else(|| {
                        FromSqlError::Other(format!("unknown {} '{}'", $label, text).into())
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

sql_text_enum!(EntityKind, "entity kind", [EntityKind::Show, EntityKind::Episode]);
sql_text_enum!(
    OwnerKind,
    "owner kind",
    [OwnerKind::Unowned, OwnerKind::Claimed, OwnerKind::Curated]
);
sql_text_enum!(
    CacheState,
    "cache state",
    [CacheState::Permanent, CacheState::Cached, CacheState::Stale]
);

/// Mirrored catalog data for a show or episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPayload {
    pub kind: EntityKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// External id of the parent show (episodes only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_count: Option<u32>,
    /// Publisher contact; drives the one-time follow-up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_contact: Option<String>,
    /// Provider fields not modelled above
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CatalogPayload {
    pub fn show(title: impl Into<String>) -> Self {
        Self::new(EntityKind::Show, title.into(), None)
    }

    pub fn episode(title: impl Into<String>, parent_external_id: impl Into<String>) -> Self {
        Self::new(
            EntityKind::Episode,
            title.into(),
            Some(parent_external_id.into()),
        )
    }

    fn new(kind: EntityKind, title: String, parent_external_id: Option<String>) -> Self {
        Self {
            kind,
            title,
            description: None,
            parent_external_id,
            published_at: None,
            image_url: None,
            audio_url: None,
            episode_count: None,
            owner_contact: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn owner_contact(mut self, contact: impl Into<String>) -> Self {
        self.owner_contact = Some(contact.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Owner contact, if present and non-blank
    pub fn contact(&self) -> Option<&str> {
        self.owner_contact
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title is required".to_string()));
        }
        match (self.kind, self.parent_external_id.as_deref()) {
            (EntityKind::Episode, None) => Err(Error::Validation(
                "episode requires a parent show".to_string(),
            )),
            (EntityKind::Episode, Some(parent)) if parent.trim().is_empty() => Err(
                Error::Validation("episode requires a parent show".to_string()),
            ),
            (EntityKind::Show, Some(_)) => Err(Error::Validation(
                "show cannot have a parent".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn content_hash(json: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A mirrored show or episode with its cache bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntity {
    pub id: i64,
    pub external_id: Option<String>,
    pub kind: EntityKind,
    /// Local id of the parent show (episodes only)
    pub show_id: Option<i64>,
    pub payload: CatalogPayload,
    /// Denormalized latest episode (shows only)
    pub latest_episode_id: Option<i64>,
    pub owner_kind: OwnerKind,
    pub cache_state: CacheState,
    pub cached_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntity {
    pub fn is_permanent(&self) -> bool {
        self.cache_state == CacheState::Permanent
    }

    /// Cache state as observed at `now`.
    ///
    /// A cached record past its expiry reads as stale even if no sweep has
    /// demoted it yet.
    pub fn effective_state(&self, now: DateTime<Utc>) -> CacheState {
        match (self.cache_state, self.expires_at) {
            (CacheState::Cached, Some(expires)) if expires <= now => CacheState::Stale,
            (CacheState::Cached, None) => CacheState::Stale,
            (state, _) => state,
        }
    }

    /// Whether a read with `ttl` may be served without refetching
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.effective_state(now) != CacheState::Cached {
            return false;
        }
        let ttl = chrono::Duration::milliseconds(duration_millis(ttl));
        match self.cached_at {
            Some(cached_at) => cached_at
                .checked_add_signed(ttl)
                .is_none_or(|until| until > now),
            None => false,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload_json: String = row.get(4)?;
        let payload = serde_json::from_str(&payload_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(Self {
            id: row.get(0)?,
            external_id: row.get(1)?,
            kind: row.get(2)?,
            show_id: row.get(3)?,
            payload,
            latest_episode_id: row.get(5)?,
            owner_kind: row.get(6)?,
            cache_state: row.get(7)?,
            cached_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
            expires_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
            created_at: from_millis(row.get(10)?),
            updated_at: from_millis(row.get(11)?),
        })
    }
}

const ENTITY_COLUMNS: &str = "id, external_id, kind, show_id, payload, latest_episode_id, \
     owner_kind, cache_state, cached_at, expires_at, created_at, updated_at";

/// Counts by cache state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    pub total: usize,
    pub shows: usize,
    pub episodes: usize,
    pub permanent: usize,
    pub fresh: usize,
    pub stale: usize,
}

/// Owner of every catalog entity record
#[derive(Clone)]
pub struct EntityStore {
    db: Database,
    hooks: Vec<Arc<dyn MutationHook>>,
}

impl EntityStore {
    /// Create a store with the latest-episode hook registered
    pub fn new(db: Database) -> Self {
        Self {
            db,
            hooks: vec![Arc::new(LatestEpisodeHook)],
        }
    }

    /// Register another hook, fired after those already registered
    pub fn with_hook(mut self, hook: Arc<dyn MutationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn get(&self, id: i64) -> Result<CatalogEntity> {
        let conn = self.db.lock()?;
        load_by_id(&conn, id)?.ok_or_else(|| Error::NotFound(format!("entity {}", id)))
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Result<Option<CatalogEntity>> {
        let conn = self.db.lock()?;
        Ok(load_by_external_id(&conn, external_id)?)
    }

    /// Insert or update by `external_id`.
    ///
    /// Payload fields are last-write-wins. Ownership is never touched here, and
    /// an owned record stays permanent with no expiry whatever `ttl` says.
    pub fn upsert(
        &self,
        external_id: &str,
        payload: &CatalogPayload,
        ttl: Duration,
    ) -> Result<CatalogEntity> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(Error::Validation("external id is required".to_string()));
        }
        payload.validate()?;

        let payload_json = serde_json::to_string(payload)?;
        let payload_hash = CatalogPayload::content_hash(&payload_json);
        let published_at = payload.published_at.map(|t| t.timestamp_millis());
        let now = now_millis();
        let expires = now.saturating_add(duration_millis(ttl));

        let mut conn = self.db.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;

        let show_id = match payload.parent_external_id.as_deref() {
            Some(parent) => Some(show_id_for(&tx, parent.trim())?),
            None => None,
        };

        let existing: Option<(i64, EntityKind, Option<i64>, String, OwnerKind)> = tx
            .query_row(
                "SELECT id, kind, show_id, payload_hash, owner_kind
                 FROM catalog_entities WHERE external_id = ?1",
                [external_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()
            .map_err(StoreError::from)?;

        let mutation = match existing {
            None => {
                tx.execute(
                    "INSERT INTO catalog_entities
                     (external_id, kind, show_id, title, payload, payload_hash, published_at,
                      owner_kind, cache_state, cached_at, expires_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?10, ?10)",
                    params![
                        external_id,
                        payload.kind,
                        show_id,
                        payload.title,
                        payload_json,
                        payload_hash,
                        published_at,
                        OwnerKind::Unowned,
                        CacheState::Cached,
                        now,
                        expires,
                    ],
                )
                .map_err(StoreError::from)?;

                Mutation {
                    entity_id: tx.last_insert_rowid(),
                    kind: payload.kind,
                    show_id,
                    previous_show_id: None,
                    op: MutationOp::Inserted,
                }
            }
            Some((id, kind, previous_show_id, previous_hash, owner_kind)) => {
                if kind != payload.kind {
                    return Err(Error::Validation(format!(
                        "{} is a {}, not a {}",
                        external_id, kind, payload.kind
                    )));
                }

                let (state, expires_at) = if owner_kind.is_owned() {
                    (CacheState::Permanent, None)
                } else {
                    (CacheState::Cached, Some(expires))
                };

                tx.execute(
                    "UPDATE catalog_entities
                     SET show_id = ?2, title = ?3, payload = ?4, payload_hash = ?5,
                         published_at = ?6, cache_state = ?7, cached_at = ?8,
                         expires_at = ?9, updated_at = ?8
                     WHERE id = ?1",
                    params![
                        id,
                        show_id,
                        payload.title,
                        payload_json,
                        payload_hash,
                        published_at,
                        state,
                        now,
                        expires_at,
                    ],
                )
                .map_err(StoreError::from)?;

                let op = if previous_hash == payload_hash && previous_show_id == show_id {
                    MutationOp::Touched
                } else {
                    MutationOp::Updated
                };

                Mutation {
                    entity_id: id,
                    kind,
                    show_id,
                    previous_show_id,
                    op,
                }
            }
        };

        self.fire(&tx, &mutation)?;
        let entity = load_by_id(&tx, mutation.entity_id)?
            .ok_or_else(|| Error::NotFound(format!("entity {}", mutation.entity_id)))?;
        tx.commit().map_err(StoreError::from)?;

        log::debug!(
            "Upserted {} {} ({:?}, {})",
            entity.kind,
            external_id,
            mutation.op,
            entity.cache_state
        );
        Ok(entity)
    }

    /// Mirrored, unowned records among `external_ids` expiring within `lead`.
    ///
    /// Ids with no local record are skipped; the mirror only refreshes what
    /// it already holds.
    pub fn due_for_refresh<'a, I>(&self, external_ids: I, lead: Duration) -> Result<Vec<CatalogEntity>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let horizon = now_millis().saturating_add(duration_millis(lead));
        let conn = self.db.lock()?;
        let mut due = Vec::new();
        for external_id in external_ids {
            let Some(entity) = load_by_external_id(&conn, external_id)? else {
                continue;
            };
            if entity.owner_kind.is_owned() || entity.is_permanent() {
                continue;
            }
            let expires = entity.expires_at.map_or(i64::MIN, |t| t.timestamp_millis());
            if expires < horizon {
                due.push(entity);
            }
        }
        Ok(due)
    }

    /// Force a cached record to read as stale. Permanent records are untouched.
    pub fn mark_expired(&self, id: i64) -> Result<CatalogEntity> {
        let conn = self.db.lock()?;
        let now = now_millis();
        conn.execute(
            "UPDATE catalog_entities
             SET cache_state = 'stale', expires_at = MIN(COALESCE(expires_at, ?2), ?2)
             WHERE id = ?1 AND cache_state != 'permanent'",
            params![id, now],
        )
        .map_err(StoreError::from)?;
        load_by_id(&conn, id)?.ok_or_else(|| Error::NotFound(format!("entity {}", id)))
    }

    /// Demote every cached record past its expiry to `stale`.
    ///
    /// Readers already derive the same state from `expires_at`, so running this
    /// any number of times changes nothing they can observe.
    pub fn demote_expired(&self) -> Result<usize> {
        let conn = self.db.lock()?;
        let demoted = conn
            .execute(
                "UPDATE catalog_entities SET cache_state = 'stale'
                 WHERE cache_state = 'cached' AND expires_at <= ?1",
                [now_millis()],
            )
            .map_err(StoreError::from)?;
        if demoted > 0 {
            log::debug!("Demoted {} expired entities", demoted);
        }
        Ok(demoted)
    }

    /// Change ownership.
    ///
    /// Claimed and curated records become permanent with no expiry. Releasing
    /// ownership returns the record to the cache already expired, so the next
    /// read refetches it.
    pub fn set_owner(&self, id: i64, owner: OwnerKind) -> Result<CatalogEntity> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let current =
            load_by_id(&tx, id)?.ok_or_else(|| Error::NotFound(format!("entity {}", id)))?;

        if current.owner_kind == owner {
            return Ok(current);
        }

        let now = now_millis();
        let (state, expires_at) = if owner.is_owned() {
            (CacheState::Permanent, None)
        } else {
            (CacheState::Cached, Some(now))
        };

        tx.execute(
            "UPDATE catalog_entities
             SET owner_kind = ?2, cache_state = ?3, expires_at = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, owner, state, expires_at, now],
        )
        .map_err(StoreError::from)?;

        self.fire(
            &tx,
            &Mutation {
                entity_id: id,
                kind: current.kind,
                show_id: current.show_id,
                previous_show_id: current.show_id,
                op: MutationOp::Updated,
            },
        )?;

        let entity =
            load_by_id(&tx, id)?.ok_or_else(|| Error::NotFound(format!("entity {}", id)))?;
        tx.commit().map_err(StoreError::from)?;

        log::info!("Entity {} owner changed {} -> {}", id, current.owner_kind, owner);
        Ok(entity)
    }

    /// Remove an entity. Removing a show removes its episodes first.
    pub fn delete(&self, id: i64) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let entity =
            load_by_id(&tx, id)?.ok_or_else(|| Error::NotFound(format!("entity {}", id)))?;

        if entity.kind == EntityKind::Show {
            let episode_ids: Vec<i64> = {
                let mut stmt = tx
                    .prepare("SELECT id FROM catalog_entities WHERE show_id = ?1")
                    .map_err(StoreError::from)?;
                stmt.query_map([id], |r| r.get(0))
                    .map_err(StoreError::from)?
                    .collect::<rusqlite::Result<_>>()
                    .map_err(StoreError::from)?
            };
            for episode_id in episode_ids {
                self.delete_row(&tx, episode_id, EntityKind::Episode, Some(id))?;
            }
        }

        self.delete_row(&tx, id, entity.kind, entity.show_id)?;
        tx.commit().map_err(StoreError::from)?;
        log::debug!("Deleted {} {}", entity.kind, id);
        Ok(())
    }

    fn delete_row(
        &self,
        conn: &Connection,
        id: i64,
        kind: EntityKind,
        show_id: Option<i64>,
    ) -> Result<()> {
        conn.execute("DELETE FROM catalog_entities WHERE id = ?1", [id])
            .map_err(StoreError::from)?;
        self.fire(
            conn,
            &Mutation {
                entity_id: id,
                kind,
                show_id,
                previous_show_id: None,
                op: MutationOp::Deleted,
            },
        )
    }

    /// Recompute a show's latest-episode back-reference
    pub fn recompute_latest_episode(&self, show_id: i64) -> Result<Option<i64>> {
        let conn = self.db.lock()?;
        match load_by_id(&conn, show_id)? {
            Some(show) if show.kind == EntityKind::Show => {
                Ok(hooks::recompute_latest_episode(&conn, show_id)?)
            }
            Some(_) => Err(Error::Validation(format!("entity {} is not a show", show_id))),
            None => Err(Error::NotFound(format!("show {}", show_id))),
        }
    }

    pub fn latest_episode(&self, show_id: i64) -> Result<Option<CatalogEntity>> {
        let show = self.get(show_id)?;
        match show.latest_episode_id {
            Some(episode_id) => {
                let conn = self.db.lock()?;
                Ok(load_by_id(&conn, episode_id)?)
            }
            None => Ok(None),
        }
    }

    pub fn stats(&self) -> Result<EntityStats> {
        let conn = self.db.lock()?;
        let counts: [i64; 6] = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(kind = 'show'), 0),
                        COALESCE(SUM(kind = 'episode'), 0),
                        COALESCE(SUM(cache_state = 'permanent'), 0),
                        COALESCE(SUM(cache_state = 'cached' AND expires_at > ?1), 0),
                        COALESCE(SUM(cache_state = 'stale'
                            OR (cache_state = 'cached' AND COALESCE(expires_at, ?1) <= ?1)), 0)
                 FROM catalog_entities",
                [now_millis()],
                |r| {
                    Ok([
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                    ])
                },
            )
            .map_err(StoreError::from)?;

        let [total, shows, episodes, permanent, fresh, stale] = counts.map(|n| n as usize);
        Ok(EntityStats {
            total,
            shows,
            episodes,
            permanent,
            fresh,
            stale,
        })
    }

    fn fire(&self, conn: &Connection, mutation: &Mutation) -> Result<()> {
        for hook in &self.hooks {
            hook.on_mutate(conn, mutation)?;
        }
        Ok(())
    }
}

fn show_id_for(conn: &Connection, parent_external_id: &str) -> Result<i64> {
    let found: Option<(i64, EntityKind)> = conn
        .query_row(
            "SELECT id, kind FROM catalog_entities WHERE external_id = ?1",
            [parent_external_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(StoreError::from)?;

    match found {
        Some((id, EntityKind::Show)) => Ok(id),
        Some(_) => Err(Error::Validation(format!(
            "parent {} is not a show",
            parent_external_id
        ))),
        None => Err(Error::Validation(format!(
            "parent show {} is not mirrored",
            parent_external_id
        ))),
    }
}

fn load_by_id(conn: &Connection, id: i64) -> std::result::Result<Option<CatalogEntity>, StoreError> {
    let sql = format!("SELECT {} FROM catalog_entities WHERE id = ?1", ENTITY_COLUMNS);
    Ok(conn
        .query_row(&sql, [id], CatalogEntity::from_row)
        .optional()?)
}

fn load_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> std::result::Result<Option<CatalogEntity>, StoreError> {
    let sql = format!(
        "SELECT {} FROM catalog_entities WHERE external_id = ?1",
        ENTITY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [external_id], CatalogEntity::from_row)
        .optional()?)
}
