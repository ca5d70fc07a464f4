use super::model::{
    from_millis, to_millis, CcElementRow, CommentRow, DigestRow, FeedItemRow, OrganisationRow,
    UserRow,
};
use crate::error::{DigestError, DigestResult};
use crate::model::{CcElement, Comment, DigestRecord, FeedItem, Organisation, User};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const DIGEST_COLUMNS: &str = "id, user_id, org_id, notification_count, new_recognitions, \
     new_comments, new_likes_feed_item, new_likes_comment, new_mentions_feed_item, \
     new_mentions_comment, busy, trigger_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL with full durability; writers from other processes wait instead of
    // failing straight away with SQLITE_BUSY.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open digest database")?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run migrations")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Digest store
// ---------------------------------------------------------------------------

/// Resolve the digest id for (user, org), creating the record on first touch.
///
/// A single upsert against the unique (user_id, org_id) index, so two callers
/// racing on the first event for the same user always get the same id.
#[instrument(skip_all, fields(user_id = %user_id, org_id = %org_id))]
pub async fn digest_id_for_user(
    pool: &Pool,
    user_id: &str,
    org_id: &str,
    now: DateTime<Utc>,
) -> DigestResult<String> {
    let mut tx = pool.begin().await?;
    let ids: Vec<String> = sqlx::query_scalar(
        "INSERT INTO notification_digests (id, user_id, org_id, notification_count, trigger_at) \
         VALUES (?, ?, ?, 0, ?) \
         ON CONFLICT(user_id, org_id) DO UPDATE SET user_id = excluded.user_id \
         RETURNING id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(org_id)
    .bind(to_millis(now))
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;
    ids.into_iter()
        .next()
        .ok_or_else(|| DigestError::not_found("digest", format!("{user_id}/{org_id}")))
}

/// Conditional upsert taking the busy flag for `id`.
///
/// Creates the record with `busy = 1` when absent, flips `busy` 0 -> 1 when
/// free, and leaves a busy record untouched. Returns whether the caller now
/// holds the flag.
#[instrument(skip_all, fields(digest_id = id))]
pub async fn try_acquire_digest(pool: &Pool, id: &str, now: DateTime<Utc>) -> DigestResult<bool> {
    let mut tx = pool.begin().await?;
    let rows: Vec<String> = sqlx::query_scalar(
        "INSERT INTO notification_digests (id, busy, trigger_at) VALUES (?, 1, ?) \
         ON CONFLICT(id) DO UPDATE SET busy = 1 WHERE busy = 0 \
         RETURNING id",
    )
    .bind(id)
    .bind(to_millis(now))
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(!rows.is_empty())
}

/// Clear the busy flag. Returns false when no record with `id` exists.
#[instrument(skip_all, fields(digest_id = id))]
pub async fn release_digest(pool: &Pool, id: &str) -> DigestResult<bool> {
    let res = sqlx::query("UPDATE notification_digests SET busy = 0 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all, fields(digest_id = id))]
pub async fn fetch_digest(pool: &Pool, id: &str) -> DigestResult<Option<DigestRecord>> {
    let row: Option<DigestRow> = sqlx::query_as(&format!(
        "SELECT {DIGEST_COLUMNS} FROM notification_digests WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(DigestRow::into_record).transpose()
}

#[instrument(skip_all)]
pub async fn find_digest_for_user(
    pool: &Pool,
    user_id: &str,
    org_id: &str,
) -> DigestResult<Option<DigestRecord>> {
    let row: Option<DigestRow> = sqlx::query_as(&format!(
        "SELECT {DIGEST_COLUMNS} FROM notification_digests WHERE user_id = ? AND org_id = ?"
    ))
    .bind(user_id)
    .bind(org_id)
    .fetch_optional(pool)
    .await?;
    row.map(DigestRow::into_record).transpose()
}

/// Write back the count, the six sequences and `trigger_at`. Never touches
/// `busy`; only the lock does.
#[instrument(skip_all, fields(digest_id = %record.id))]
pub async fn save_digest(pool: &Pool, record: &DigestRecord) -> DigestResult<()> {
    let res = sqlx::query(
        "UPDATE notification_digests SET notification_count = ?, new_recognitions = ?, \
         new_comments = ?, new_likes_feed_item = ?, new_likes_comment = ?, \
         new_mentions_feed_item = ?, new_mentions_comment = ?, trigger_at = ? WHERE id = ?",
    )
    .bind(record.notification_count)
    .bind(serde_json::to_string(&record.new_recognitions)?)
    .bind(serde_json::to_string(&record.new_comments)?)
    .bind(serde_json::to_string(&record.new_likes_feed_item)?)
    .bind(serde_json::to_string(&record.new_likes_comment)?)
    .bind(serde_json::to_string(&record.new_mentions_feed_item)?)
    .bind(serde_json::to_string(&record.new_mentions_comment)?)
    .bind(to_millis(record.trigger_at))
    .bind(&record.id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(DigestError::not_found("digest", record.id.clone()));
    }
    Ok(())
}

/// Ids of digests holding pending items whose `trigger_at` has passed.
#[instrument(skip_all)]
pub async fn due_digest_ids(pool: &Pool, now: DateTime<Utc>) -> DigestResult<Vec<String>> {
    let ids = sqlx::query_scalar(
        "SELECT id FROM notification_digests \
         WHERE notification_count > 0 AND trigger_at <= ? AND user_id IS NOT NULL \
         ORDER BY trigger_at ASC, id ASC",
    )
    .bind(to_millis(now))
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Window cursor
// ---------------------------------------------------------------------------

/// Atomically claim the window ending at `end`.
///
/// Returns the previous `last_sent_at`, or None when the cursor did not exist
/// yet (the cursor is created at `end` and the caller skips the cycle). The
/// cursor never moves backwards: an `end` at or before the stored value leaves
/// it in place and the returned start is not earlier than `end`. The write is
/// committed before this returns.
#[instrument(skip_all)]
pub async fn get_and_set_last_sent_at(
    pool: &Pool,
    end: DateTime<Utc>,
) -> DigestResult<Option<DateTime<Utc>>> {
    let mut tx = pool.begin().await?;
    let previous: Vec<Option<i64>> = sqlx::query_scalar(
        "INSERT INTO updates_digest (id, last_sent_at) VALUES (1, ?) \
         ON CONFLICT(id) DO UPDATE SET previous_sent_at = last_sent_at, \
         last_sent_at = MAX(last_sent_at, excluded.last_sent_at) \
         RETURNING previous_sent_at",
    )
    .bind(to_millis(end))
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(previous.into_iter().next().flatten().map(from_millis))
}

#[instrument(skip_all)]
pub async fn last_sent_at(pool: &Pool) -> DigestResult<Option<DateTime<Utc>>> {
    let ms: Option<i64> = sqlx::query_scalar("SELECT last_sent_at FROM updates_digest WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(ms.map(from_millis))
}

// ---------------------------------------------------------------------------
// Read-only collaborator tables
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn fetch_comment(pool: &Pool, id: &str) -> DigestResult<Option<Comment>> {
    let row: Option<CommentRow> =
        sqlx::query_as("SELECT id, org_id, feed_item_id, author_id FROM comments WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(Comment::from))
}

const FEED_COLUMNS: &str = "id, org_id, author_id, feed_type, cc_element_id, story, note, \
     mentions_ids, recipient_ids, created_at";

#[instrument(skip_all)]
pub async fn fetch_feed_item(pool: &Pool, id: &str) -> DigestResult<Option<FeedItem>> {
    let row: Option<FeedItemRow> =
        sqlx::query_as(&format!("SELECT {FEED_COLUMNS} FROM feed_items WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    row.map(FeedItemRow::into_feed_item).transpose()
}

/// Feed items of `org_id` created in `[start, end)`, oldest first.
#[instrument(skip_all, fields(org_id = %org_id))]
pub async fn feed_items_in_window(
    pool: &Pool,
    org_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DigestResult<Vec<FeedItem>> {
    let rows: Vec<FeedItemRow> = sqlx::query_as(&format!(
        "SELECT {FEED_COLUMNS} FROM feed_items \
         WHERE org_id = ? AND created_at >= ? AND created_at < ? \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(org_id)
    .bind(to_millis(start))
    .bind(to_millis(end))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(FeedItemRow::into_feed_item).collect()
}

#[instrument(skip_all)]
pub async fn list_organisations(pool: &Pool) -> DigestResult<Vec<Organisation>> {
    let rows: Vec<OrganisationRow> =
        sqlx::query_as("SELECT id, name, is_demo FROM organisations ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(Organisation::from).collect())
}

#[instrument(skip_all, fields(org_id = %org_id))]
pub async fn users_in_org(pool: &Pool, org_id: &str) -> DigestResult<Vec<User>> {
    let rows: Vec<UserRow> = sqlx::query_as(
        "SELECT id, org_id, first_name, last_name, email, roles FROM users \
         WHERE org_id = ? ORDER BY id",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(UserRow::into_user).collect()
}

#[instrument(skip_all)]
pub async fn fetch_user(pool: &Pool, id: &str) -> DigestResult<Option<User>> {
    let row: Option<UserRow> = sqlx::query_as(
        "SELECT id, org_id, first_name, last_name, email, roles FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(UserRow::into_user).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_cc_element(pool: &Pool, id: &str) -> DigestResult<Option<CcElement>> {
    let row: Option<CcElementRow> =
        sqlx::query_as("SELECT id, narrative FROM cc_elements WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(CcElement::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn setup_pool() -> (tempfile::TempDir, Pool) {
        let td = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/digest.db", td.path().display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (td, pool)
    }

    #[test]
    fn prepare_url_passes_memory_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        assert_eq!(
            prepare_sqlite_url("sqlite:/tmp/x.db?mode=rwc"),
            "sqlite:///tmp/x.db?mode=rwc"
        );
    }

    #[tokio::test]
    async fn digest_id_is_stable_per_user_and_org() {
        let (_td, pool) = setup_pool().await;
        let now = Utc::now();
        let a = digest_id_for_user(&pool, "u1", "o1", now).await.unwrap();
        let b = digest_id_for_user(&pool, "u1", "o1", now).await.unwrap();
        let c = digest_id_for_user(&pool, "u1", "o2", now).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let rec = fetch_digest(&pool, &a).await.unwrap().unwrap();
        assert_eq!(rec.notification_count, 0);
        assert!(!rec.busy);
        assert_eq!(rec.pending_len(), 0);
    }

    #[tokio::test]
    async fn acquire_release_cycle() {
        let (_td, pool) = setup_pool().await;
        let now = Utc::now();
        let id = digest_id_for_user(&pool, "u1", "o1", now).await.unwrap();

        assert!(try_acquire_digest(&pool, &id, now).await.unwrap());
        assert!(!try_acquire_digest(&pool, &id, now).await.unwrap());
        assert!(fetch_digest(&pool, &id).await.unwrap().unwrap().busy);

        assert!(release_digest(&pool, &id).await.unwrap());
        assert!(try_acquire_digest(&pool, &id, now).await.unwrap());
        assert!(release_digest(&pool, &id).await.unwrap());

        assert!(!release_digest(&pool, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn acquire_creates_absent_record() {
        let (_td, pool) = setup_pool().await;
        assert!(try_acquire_digest(&pool, "fresh", Utc::now()).await.unwrap());
        let rec = fetch_digest(&pool, "fresh").await.unwrap().unwrap();
        assert!(rec.busy);
        assert!(rec.user_id.is_none());
    }

    #[tokio::test]
    async fn cursor_claims_contiguous_windows() {
        let (_td, pool) = setup_pool().await;
        let t0 = Utc::now();
        let t1 = t0 + ChronoDuration::hours(24);
        let t2 = t1 + ChronoDuration::hours(24);

        assert_eq!(get_and_set_last_sent_at(&pool, t0).await.unwrap(), None);
        let start = get_and_set_last_sent_at(&pool, t1).await.unwrap().unwrap();
        assert_eq!(start.timestamp_millis(), t0.timestamp_millis());
        let start = get_and_set_last_sent_at(&pool, t2).await.unwrap().unwrap();
        assert_eq!(start.timestamp_millis(), t1.timestamp_millis());
        assert_eq!(
            last_sent_at(&pool).await.unwrap().unwrap().timestamp_millis(),
            t2.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn cursor_claim_is_committed_on_return() {
        let (_td, pool) = setup_pool().await;
        let t0 = Utc::now();
        let t1 = t0 + ChronoDuration::hours(1);
        get_and_set_last_sent_at(&pool, t0).await.unwrap();
        get_and_set_last_sent_at(&pool, t1).await.unwrap();

        // A separate connection must already see the new cursor.
        let mut other = pool.acquire().await.unwrap();
        let ms: i64 = sqlx::query_scalar("SELECT last_sent_at FROM updates_digest WHERE id = 1")
            .fetch_one(&mut *other)
            .await
            .unwrap();
        assert_eq!(ms, t1.timestamp_millis());
    }

    #[tokio::test]
    async fn new_digest_is_visible_on_return() {
        let (_td, pool) = setup_pool().await;
        let id = digest_id_for_user(&pool, "u1", "o1", Utc::now()).await.unwrap();
        assert!(fetch_digest(&pool, &id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let (_td, pool) = setup_pool().await;
        let t0 = Utc::now();
        let t2 = t0 + ChronoDuration::hours(2);
        get_and_set_last_sent_at(&pool, t0).await.unwrap();
        get_and_set_last_sent_at(&pool, t2).await.unwrap();

        let start = get_and_set_last_sent_at(&pool, t0 + ChronoDuration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(start.timestamp_millis(), t2.timestamp_millis());
        assert_eq!(
            last_sent_at(&pool).await.unwrap().unwrap().timestamp_millis(),
            t2.timestamp_millis()
        );

        let start = get_and_set_last_sent_at(&pool, t0 + ChronoDuration::hours(3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(start.timestamp_millis(), t2.timestamp_millis());
    }
}
