//! Write API into the notifications digest.
//!
//! Every operation resolves the organisation from the originating comment or
//! feed item, then updates each recipient's digest on its own under the
//! record mutex. There is no atomicity across recipients.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::db::{self, Pool};
use crate::directory::Directory;
use crate::error::{DigestError, DigestResult};
use crate::lock::{ExclusiveUpdateLock, LockPolicy};
use crate::model::{
    Comment, CommentEntry, CommentLikeEntry, CommentMentionEntry, DigestEntry, DigestRecord,
    FeedItem, FeedItemLikeEntry, FeedItemMentionEntry, LikeKey, PendingDigest, RecognitionEntry,
};

static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid id pattern"));

fn check_id(id: &str, what: &str, caller: &'static str) -> DigestResult<()> {
    if ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(DigestError::invalid(caller, format!("{what} {id:?} is not a valid id")))
    }
}

fn check_recipient_ids(recipient_ids: &[String], caller: &'static str) -> DigestResult<()> {
    recipient_ids
        .iter()
        .try_for_each(|r| check_id(r, "recipient", caller))
}

/// First occurrence wins, order preserved.
fn dedup<T: Clone + Eq + Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct NotificationsDigest {
    pool: Pool,
    lock: ExclusiveUpdateLock<Pool>,
    directory: Arc<dyn Directory>,
}

impl NotificationsDigest {
    pub fn new(pool: Pool, directory: Arc<dyn Directory>, policy: LockPolicy) -> Self {
        Self {
            lock: ExclusiveUpdateLock::new(pool.clone(), policy),
            pool,
            directory,
        }
    }

    async fn comment(&self, id: &str) -> DigestResult<Comment> {
        self.directory
            .comment(id)
            .await?
            .ok_or_else(|| DigestError::not_found("comment", id))
    }

    async fn feed_item(&self, id: &str) -> DigestResult<FeedItem> {
        self.directory
            .feed_item(id)
            .await?
            .ok_or_else(|| DigestError::not_found("feed item", id))
    }

    async fn load(&self, digest_id: &str) -> DigestResult<DigestRecord> {
        db::fetch_digest(&self.pool, digest_id)
            .await?
            .ok_or_else(|| DigestError::not_found("digest", digest_id))
    }

    async fn push_to_each(
        &self,
        recipient_ids: &[String],
        org_id: &str,
        entry: DigestEntry,
    ) -> DigestResult<()> {
        for recipient in recipient_ids {
            let digest_id = db::digest_id_for_user(&self.pool, recipient, org_id, Utc::now()).await?;
            let id = digest_id.as_str();
            let entry = entry.clone();
            self.lock
                .with_lock(id, move || async move {
                    let mut record = self.load(id).await?;
                    record.push(entry, Utc::now());
                    db::save_digest(&self.pool, &record).await
                })
                .await?;
        }
        Ok(())
    }

    async fn pull_from_each(
        &self,
        recipient_ids: &[String],
        org_id: &str,
        key: &LikeKey,
    ) -> DigestResult<()> {
        for recipient in recipient_ids {
            let digest_id = db::digest_id_for_user(&self.pool, recipient, org_id, Utc::now()).await?;
            let id = digest_id.as_str();
            // Count and removal share one acquisition so a concurrent push for
            // the same key cannot slip in between.
            let removed = self
                .lock
                .with_lock(id, move || async move {
                    let mut record = self.load(id).await?;
                    let matching = record.count_likes(key);
                    if matching == 0 {
                        return Ok(0);
                    }
                    record.remove_likes(key);
                    db::save_digest(&self.pool, &record).await?;
                    Ok(matching)
                })
                .await?;
            debug!(digest_id = id, removed, "likes removed from digest");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(comment_id = %comment_id))]
    pub async fn add_new_comment(&self, recipient_ids: &[String], comment_id: &str) -> DigestResult<()> {
        const CALLER: &str = "add_new_comment";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(comment_id, "comment", CALLER)?;
        let comment = self.comment(comment_id).await?;
        let entry = DigestEntry::Comment(CommentEntry {
            comment_id: comment.id.clone(),
            author_id: comment.author_id.clone(),
            feed_item_id: comment.feed_item_id.clone(),
        });
        self.push_to_each(recipient_ids, &comment.org_id, entry).await?;
        info!(recipients = recipient_ids.len(), "comment added to digests");
        Ok(())
    }

    #[instrument(skip_all, fields(feed_item_id = %feed_item_id, liker_id = %liker_id))]
    pub async fn add_new_like_feed_item(
        &self,
        recipient_ids: &[String],
        feed_item_id: &str,
        liker_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "add_new_like_feed_item";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(feed_item_id, "feed item", CALLER)?;
        check_id(liker_id, "liker", CALLER)?;
        let item = self.feed_item(feed_item_id).await?;
        let entry = DigestEntry::LikeFeedItem(FeedItemLikeEntry {
            feed_item_id: feed_item_id.to_string(),
            liker_id: liker_id.to_string(),
        });
        self.push_to_each(recipient_ids, &item.org_id, entry).await
    }

    #[instrument(skip_all, fields(feed_item_id = %feed_item_id, liker_id = %liker_id))]
    pub async fn remove_like_feed_item(
        &self,
        recipient_ids: &[String],
        feed_item_id: &str,
        liker_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "remove_like_feed_item";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(feed_item_id, "feed item", CALLER)?;
        check_id(liker_id, "liker", CALLER)?;
        let item = self.feed_item(feed_item_id).await?;
        // The like may already be gone if the digest was sent in between.
        let key = LikeKey::FeedItem {
            feed_item_id: feed_item_id.to_string(),
            liker_id: liker_id.to_string(),
        };
        self.pull_from_each(recipient_ids, &item.org_id, &key).await
    }

    #[instrument(skip_all, fields(comment_id = %comment_id, liker_id = %liker_id))]
    pub async fn add_new_like_comment(
        &self,
        recipient_ids: &[String],
        comment_id: &str,
        liker_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "add_new_like_comment";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(comment_id, "comment", CALLER)?;
        check_id(liker_id, "liker", CALLER)?;
        let comment = self.comment(comment_id).await?;
        let entry = DigestEntry::LikeComment(CommentLikeEntry {
            comment_id: comment_id.to_string(),
            liker_id: liker_id.to_string(),
            feed_item_id: comment.feed_item_id.clone(),
        });
        self.push_to_each(recipient_ids, &comment.org_id, entry).await
    }

    #[instrument(skip_all, fields(comment_id = %comment_id, liker_id = %liker_id))]
    pub async fn remove_like_comment(
        &self,
        recipient_ids: &[String],
        comment_id: &str,
        liker_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "remove_like_comment";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(comment_id, "comment", CALLER)?;
        check_id(liker_id, "liker", CALLER)?;
        let comment = self.comment(comment_id).await?;
        let key = LikeKey::Comment {
            comment_id: comment_id.to_string(),
            liker_id: liker_id.to_string(),
        };
        self.pull_from_each(recipient_ids, &comment.org_id, &key).await
    }

    #[instrument(skip_all, fields(feed_item_id = %feed_item_id))]
    pub async fn add_new_recognition(
        &self,
        recipient_ids: &[String],
        feed_item_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "add_new_recognition";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(feed_item_id, "feed item", CALLER)?;
        let item = self.feed_item(feed_item_id).await?;
        let entry = DigestEntry::Recognition(RecognitionEntry {
            feed_item_id: item.id.clone(),
            author_id: item.author_id.clone(),
        });
        self.push_to_each(recipient_ids, &item.org_id, entry).await?;
        info!(recipients = recipient_ids.len(), "recognition added to digests");
        Ok(())
    }

    #[instrument(skip_all, fields(feed_item_id = %feed_item_id))]
    pub async fn add_new_mention_in_feed_item(
        &self,
        recipient_ids: &[String],
        feed_item_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "add_new_mention_in_feed_item";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(feed_item_id, "feed item", CALLER)?;
        let item = self.feed_item(feed_item_id).await?;
        let entry = DigestEntry::MentionFeedItem(FeedItemMentionEntry {
            feed_item_id: item.id.clone(),
            author_id: item.author_id.clone(),
        });
        self.push_to_each(recipient_ids, &item.org_id, entry).await
    }

    #[instrument(skip_all, fields(comment_id = %comment_id))]
    pub async fn add_new_mention_in_comment(
        &self,
        recipient_ids: &[String],
        comment_id: &str,
    ) -> DigestResult<()> {
        const CALLER: &str = "add_new_mention_in_comment";
        check_recipient_ids(recipient_ids, CALLER)?;
        check_id(comment_id, "comment", CALLER)?;
        let comment = self.comment(comment_id).await?;
        let entry = DigestEntry::MentionComment(CommentMentionEntry {
            comment_id: comment.id.clone(),
            author_id: comment.author_id.clone(),
            feed_item_id: comment.feed_item_id.clone(),
        });
        self.push_to_each(recipient_ids, &comment.org_id, entry).await
    }

    /// Read and reset a digest under its mutex.
    ///
    /// This is the hand-off point for whatever sends digests: the pending
    /// entries are returned (likes de-duplicated) and the record goes back to
    /// zero. `trigger_at` is left as is. Returns None for an unknown id.
    #[instrument(skip_all, fields(digest_id = %digest_id))]
    pub async fn take_pending(&self, digest_id: &str) -> DigestResult<Option<PendingDigest>> {
        if db::fetch_digest(&self.pool, digest_id).await?.is_none() {
            return Ok(None);
        }
        let pending = self
            .lock
            .with_lock(digest_id, move || async move {
                let mut record = self.load(digest_id).await?;
                let pending = PendingDigest {
                    digest_id: record.id.clone(),
                    new_recognitions: std::mem::take(&mut record.new_recognitions),
                    new_comments: std::mem::take(&mut record.new_comments),
                    new_likes_feed_item: dedup(&record.new_likes_feed_item),
                    new_likes_comment: dedup(&record.new_likes_comment),
                    new_mentions_feed_item: std::mem::take(&mut record.new_mentions_feed_item),
                    new_mentions_comment: std::mem::take(&mut record.new_mentions_comment),
                };
                record.new_likes_feed_item.clear();
                record.new_likes_comment.clear();
                record.notification_count = 0;
                db::save_digest(&self.pool, &record).await?;
                Ok(pending)
            })
            .await?;
        Ok(Some(pending))
    }

    /// Digest ids with pending items whose `trigger_at` has passed.
    pub async fn due_digests(&self) -> DigestResult<Vec<String>> {
        db::due_digest_ids(&self.pool, Utc::now()).await
    }

    pub async fn digest_for_user(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> DigestResult<Option<DigestRecord>> {
        db::find_digest_for_user(&self.pool, user_id, org_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_pattern() {
        assert!(check_id("abc_DEF-123", "x", "t").is_ok());
        assert!(check_id("", "x", "t").is_err());
        assert!(check_id("has space", "x", "t").is_err());
        assert!(check_id(&"a".repeat(65), "x", "t").is_err());
    }

    #[test]
    fn recipient_check_reports_caller() {
        let err = check_recipient_ids(&["ok".into(), "not ok".into()], "add_new_comment")
            .unwrap_err();
        match err {
            DigestError::InvalidArgument { caller, reason } => {
                assert_eq!(caller, "add_new_comment");
                assert!(reason.contains("not ok"));
            }
            other => panic!("wrong error: {other:?}"),
        }
        assert!(check_recipient_ids(&[], "add_new_comment").is_ok());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(dedup(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
