// SQLite persistence adapter.
//
// Documents are stored as their `{"ops":[...]}` JSON and read back through
// the content normalizer, so a damaged row degrades to the empty document
// instead of failing the read. Timestamps are RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use scriptdesk_common::delta::Delta;
use scriptdesk_common::normalize::normalize_str;
use scriptdesk_common::types::{Draft, Suggestion, SuggestionStatus, VersionSnapshot};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::meta_db::MetaDb;
use super::{content_hash, PersistenceAdapter, StoreError};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<MetaDb>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_db(MetaDb::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_db(MetaDb::open_in_memory()?))
    }

    fn from_db(db: MetaDb) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }
}

impl PersistenceAdapter for SqliteStore {
    async fn load_canonical_document(&self, script_id: Uuid) -> Result<Option<Delta>, StoreError> {
        let db = self.db.lock().await;
        let content: Option<String> = db
            .connection()
            .query_row(
                "SELECT content FROM canonical_documents WHERE script_id = ?1",
                params![script_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to load canonical document for script {script_id}"))?;
        Ok(content.as_deref().map(normalize_str))
    }

    async fn save_canonical_document(
        &self,
        script_id: Uuid,
        document: &Delta,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO canonical_documents (script_id, content, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(script_id) DO UPDATE SET
                     content = excluded.content,
                     updated_at = excluded.updated_at",
                params![script_id.to_string(), document.to_json(), Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to save canonical document for script {script_id}"))?;
        debug!(script = %script_id, "canonical document saved");
        Ok(())
    }

    async fn load_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
    ) -> Result<Option<Draft>, StoreError> {
        let db = self.db.lock().await;
        let row: Option<(String, String)> = db
            .connection()
            .query_row(
                "SELECT content, updated_at FROM drafts WHERE script_id = ?1 AND author_id = ?2",
                params![script_id.to_string(), author_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to load draft of {author_id} for script {script_id}"))?;

        let Some((content, updated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Draft {
            script_id,
            author_id: author_id.to_owned(),
            content: normalize_str(&content),
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    async fn save_draft(
        &self,
        script_id: Uuid,
        author_id: &str,
        content: &Delta,
    ) -> Result<Draft, StoreError> {
        let updated_at = Utc::now();
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO drafts (script_id, author_id, content, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(script_id, author_id) DO UPDATE SET
                     content = excluded.content,
                     updated_at = excluded.updated_at",
                params![script_id.to_string(), author_id, content.to_json(), updated_at.to_rfc3339()],
            )
            .with_context(|| format!("failed to save draft of {author_id} for script {script_id}"))?;
        Ok(Draft { script_id, author_id: author_id.to_owned(), content: content.clone(), updated_at })
    }

    async fn delete_draft(&self, script_id: Uuid, author_id: &str) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let deleted = db
            .connection()
            .execute(
                "DELETE FROM drafts WHERE script_id = ?1 AND author_id = ?2",
                params![script_id.to_string(), author_id],
            )
            .with_context(|| {
                format!("failed to delete draft of {author_id} for script {script_id}")
            })?;
        Ok(deleted > 0)
    }

    async fn list_pending_suggestions(
        &self,
        script_id: Uuid,
    ) -> Result<Vec<Suggestion>, StoreError> {
        let db = self.db.lock().await;
        let rows = query_suggestions(
            db.connection(),
            "WHERE script_id = ?1 AND status = 'pending' ORDER BY created_at, rowid",
            &script_id.to_string(),
        )
        .with_context(|| format!("failed to list pending suggestions for script {script_id}"))?;
        Ok(rows)
    }

    async fn insert_suggestion(&self, suggestion: &Suggestion) -> Result<Uuid, StoreError> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO suggestions
                     (id, script_id, author_id, diff_operations, status,
                      rejection_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    suggestion.id.to_string(),
                    suggestion.script_id.to_string(),
                    suggestion.author_id,
                    suggestion.diff_operations.to_json(),
                    suggestion.status.as_str(),
                    suggestion.rejection_reason,
                    suggestion.created_at.to_rfc3339(),
                    suggestion.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert suggestion {}", suggestion.id))?;
        Ok(suggestion.id)
    }

    async fn update_suggestion_status(
        &self,
        id: Uuid,
        status: SuggestionStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let updated = db
            .connection()
            .execute(
                "UPDATE suggestions
                 SET status = ?2, rejection_reason = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), status.as_str(), reason, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to update status of suggestion {id}"))?;
        if updated == 0 {
            return Err(not_pending(db.connection(), id)?);
        }
        Ok(())
    }

    async fn append_version_snapshot(
        &self,
        script_id: Uuid,
        document: &Delta,
        version_name: Option<&str>,
    ) -> Result<VersionSnapshot, StoreError> {
        let snapshot = VersionSnapshot {
            id: Uuid::new_v4(),
            script_id,
            content: document.clone(),
            version_name: version_name.map(str::to_owned),
            content_hash: content_hash(document),
            created_at: Utc::now(),
        };
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO version_snapshots
                     (id, script_id, content, version_name, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.id.to_string(),
                    script_id.to_string(),
                    document.to_json(),
                    snapshot.version_name,
                    snapshot.content_hash,
                    snapshot.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to append version snapshot for script {script_id}"))?;
        Ok(snapshot)
    }

    async fn commit_approval(
        &self,
        suggestion_id: Uuid,
        script_id: Uuid,
        document: &Delta,
    ) -> Result<VersionSnapshot, StoreError> {
        let snapshot = VersionSnapshot {
            id: Uuid::new_v4(),
            script_id,
            content: document.clone(),
            version_name: None,
            content_hash: content_hash(document),
            created_at: Utc::now(),
        };
        let now = snapshot.created_at.to_rfc3339();
        let content = document.to_json();

        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction()
            .context("failed to start approval transaction")?;

        let updated = tx
            .execute(
                "UPDATE suggestions
                 SET status = 'approved', rejection_reason = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![suggestion_id.to_string(), now],
            )
            .with_context(|| format!("failed to approve suggestion {suggestion_id}"))?;
        if updated == 0 {
            return Err(not_pending(&tx, suggestion_id)?);
        }

        tx.execute(
            "INSERT INTO canonical_documents (script_id, content, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(script_id) DO UPDATE SET
                 content = excluded.content,
                 updated_at = excluded.updated_at",
            params![script_id.to_string(), content, now],
        )
        .with_context(|| format!("failed to save canonical document for script {script_id}"))?;
        tx.execute(
            "INSERT INTO version_snapshots
                 (id, script_id, content, version_name, content_hash, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
            params![snapshot.id.to_string(), script_id.to_string(), content, snapshot.content_hash, now],
        )
        .with_context(|| format!("failed to append version snapshot for script {script_id}"))?;

        tx.commit().with_context(|| format!("failed to commit approval of {suggestion_id}"))?;
        debug!(suggestion = %suggestion_id, script = %script_id, "approval committed");
        Ok(snapshot)
    }

    async fn load_suggestion(&self, id: Uuid) -> Result<Option<Suggestion>, StoreError> {
        let db = self.db.lock().await;
        let mut rows = query_suggestions(db.connection(), "WHERE id = ?1", &id.to_string())
            .with_context(|| format!("failed to load suggestion {id}"))?;
        Ok(rows.pop())
    }

    async fn list_version_snapshots(
        &self,
        script_id: Uuid,
    ) -> Result<Vec<VersionSnapshot>, StoreError> {
        let db = self.db.lock().await;
        let snapshots = query_snapshots(db.connection(), script_id)
            .with_context(|| format!("failed to list version snapshots for script {script_id}"))?;
        Ok(snapshots)
    }
}

/// Explains why a pending-only update touched no row.
fn not_pending(conn: &Connection, id: Uuid) -> Result<StoreError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM suggestions WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read status of suggestion {id}"))?;
    let Some(status) = status else {
        return Ok(StoreError::SuggestionNotFound(id));
    };
    let status = SuggestionStatus::parse(&status)
        .with_context(|| format!("unknown suggestion status `{status}`"))?;
    Ok(StoreError::NotPending { id, status })
}

// ── Row decoding ───────────────────────────────────────────────────

struct SuggestionRow {
    id: String,
    script_id: String,
    author_id: String,
    diff_operations: String,
    status: String,
    rejection_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

fn query_suggestions(conn: &Connection, filter: &str, key: &str) -> Result<Vec<Suggestion>> {
    let sql = format!(
        "SELECT id, script_id, author_id, diff_operations, status,
                rejection_reason, created_at, updated_at
         FROM suggestions {filter}"
    );
    let mut stmt = conn.prepare(&sql).context("failed to prepare suggestion query")?;
    let rows = stmt
        .query_map(params![key], |row| {
            Ok(SuggestionRow {
                id: row.get(0)?,
                script_id: row.get(1)?,
                author_id: row.get(2)?,
                diff_operations: row.get(3)?,
                status: row.get(4)?,
                rejection_reason: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })
        .context("failed to query suggestions")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read suggestion rows")?;

    rows.into_iter().map(decode_suggestion).collect()
}

fn decode_suggestion(row: SuggestionRow) -> Result<Suggestion> {
    let status = SuggestionStatus::parse(&row.status)
        .with_context(|| format!("unknown suggestion status `{}`", row.status))?;
    Ok(Suggestion {
        id: parse_uuid(&row.id)?,
        script_id: parse_uuid(&row.script_id)?,
        author_id: row.author_id,
        diff_operations: parse_patch(&row.diff_operations)?,
        status,
        rejection_reason: row.rejection_reason,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn query_snapshots(conn: &Connection, script_id: Uuid) -> Result<Vec<VersionSnapshot>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, content, version_name, content_hash, created_at
             FROM version_snapshots
             WHERE script_id = ?1
             ORDER BY seq DESC",
        )
        .context("failed to prepare snapshot query")?;
    let rows = stmt
        .query_map(params![script_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .context("failed to query version snapshots")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read version snapshot rows")?;

    rows.into_iter()
        .map(|(id, content, version_name, content_hash, created_at)| {
            Ok(VersionSnapshot {
                id: parse_uuid(&id)?,
                script_id,
                content: normalize_str(&content),
                version_name,
                content_hash,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect()
}

/// Patches are not documents, so they skip the normalizer; a malformed
/// stored patch is an error rather than a silent no-op.
fn parse_patch(raw: &str) -> Result<Delta> {
    serde_json::from_str(raw).context("stored diff operations are not a valid delta")
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid uuid `{raw}` in database"))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp `{raw}` in database"))
}

#[cfg(test)]
mod tests {
    use scriptdesk_common::delta::{attributes, LINE_ID_ATTRIBUTE};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn suggestion(script_id: Uuid, author: &str) -> Suggestion {
        let now = Utc::now();
        Suggestion {
            id: Uuid::new_v4(),
            script_id,
            author_id: author.to_owned(),
            diff_operations: Delta::new()
                .retain(5, None)
                .insert("!", Some(attributes([("bold", json!(true))]))),
            status: SuggestionStatus::Pending,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn canonical_document_survives_reopen_with_line_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scriptdesk.db");
        let script = Uuid::new_v4();
        let document = Delta::new()
            .insert("INT. KITCHEN", None)
            .insert("\n", Some(attributes([(LINE_ID_ATTRIBUTE, json!("line-1"))])));

        SqliteStore::open(&path).unwrap().save_canonical_document(script, &document).await.unwrap();

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load_canonical_document(script).await.unwrap(), Some(document));
        assert_eq!(reopened.load_canonical_document(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_document_rows_read_back_as_empty_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        let script = Uuid::new_v4();
        {
            let db = store.db.lock().await;
            db.connection()
                .execute(
                    "INSERT INTO canonical_documents (script_id, content, updated_at)
                     VALUES (?1, 'not json at all', ?2)",
                    params![script.to_string(), Utc::now().to_rfc3339()],
                )
                .unwrap();
        }
        let loaded = store.load_canonical_document(script).await.unwrap().expect("row exists");
        assert_eq!(loaded.plain_text(), "not json at all\n");
    }

    #[tokio::test]
    async fn drafts_upsert_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let script = Uuid::new_v4();
        store.save_draft(script, "ada", &Delta::new().insert("one\n", None)).await.unwrap();
        let saved = store.save_draft(script, "ada", &Delta::new().insert("two\n", None)).await.unwrap();

        let loaded = store.load_draft(script, "ada").await.unwrap().expect("draft stored");
        assert_eq!(loaded.content, saved.content);
        assert_eq!(loaded.updated_at.timestamp_millis(), saved.updated_at.timestamp_millis());

        assert!(store.delete_draft(script, "ada").await.unwrap());
        assert!(store.load_draft(script, "ada").await.unwrap().is_none());
        assert!(!store.delete_draft(script, "ada").await.unwrap());
    }

    #[tokio::test]
    async fn suggestions_round_trip_and_filter_by_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let script = Uuid::new_v4();
        let first = suggestion(script, "ada");
        let second = suggestion(script, "bob");
        store.insert_suggestion(&first).await.unwrap();
        store.insert_suggestion(&second).await.unwrap();

        store
            .update_suggestion_status(second.id, SuggestionStatus::Rejected, Some("too long"))
            .await
            .unwrap();

        let pending = store.list_pending_suggestions(script).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[0].diff_operations, first.diff_operations);

        let rejected = store.load_suggestion(second.id).await.unwrap().expect("stored");
        assert_eq!(rejected.status, SuggestionStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("too long"));
        assert!(store.load_suggestion(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updating_a_missing_suggestion_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .update_suggestion_status(Uuid::nil(), SuggestionStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SuggestionNotFound(_)));
    }

    #[tokio::test]
    async fn approval_commits_atomically_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        let script = Uuid::new_v4();
        let pending = suggestion(script, "ada");
        store.insert_suggestion(&pending).await.unwrap();
        let approved = Delta::new().insert("Hello!\n", None);

        let snapshot = store.commit_approval(pending.id, script, &approved).await.unwrap();
        assert_eq!(snapshot.content_hash, content_hash(&approved));

        let err = store
            .commit_approval(pending.id, script, &Delta::new().insert("Hello!!\n", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotPending { id, status: SuggestionStatus::Approved } if id == pending.id
        ));
        assert_eq!(store.load_canonical_document(script).await.unwrap(), Some(approved));
        assert_eq!(store.list_version_snapshots(script).await.unwrap().len(), 1);

        let err = store
            .commit_approval(Uuid::new_v4(), script, &Delta::empty_document())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SuggestionNotFound(_)));
        assert_eq!(store.list_version_snapshots(script).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_suggestions_cannot_be_updated_again() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rejected = suggestion(Uuid::new_v4(), "ada");
        store.insert_suggestion(&rejected).await.unwrap();
        store
            .update_suggestion_status(rejected.id, SuggestionStatus::Rejected, Some("too long"))
            .await
            .unwrap();

        let err = store
            .update_suggestion_status(rejected.id, SuggestionStatus::Approved, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotPending { status: SuggestionStatus::Rejected, .. }));
    }

    #[tokio::test]
    async fn snapshots_are_newest_first_with_hashes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let script = Uuid::new_v4();
        let first = Delta::new().insert("Draft one\n", None);
        let second = Delta::new().insert("Draft two\n", None);
        store.append_version_snapshot(script, &first, Some("table read")).await.unwrap();
        store.append_version_snapshot(script, &second, None).await.unwrap();

        let snapshots = store.list_version_snapshots(script).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].content, second);
        assert_eq!(snapshots[1].version_name.as_deref(), Some("table read"));
        assert_eq!(snapshots[1].content_hash, content_hash(&first));
    }
}
