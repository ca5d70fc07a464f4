//! Row shapes returned by repository queries.
//!
//! Rows mirror the SQLite columns one-to-one; conversion into the domain
//! types in `crate::model` happens here so callers never see JSON columns or
//! epoch millis.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::DigestResult;
use crate::model::{Comment, CcElement, DigestRecord, FeedItem, FeedType, Organisation, User};

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[derive(Debug, Clone, FromRow)]
pub struct DigestRow {
    pub id: String,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub notification_count: i64,
    pub new_recognitions: String,
    pub new_comments: String,
    pub new_likes_feed_item: String,
    pub new_likes_comment: String,
    pub new_mentions_feed_item: String,
    pub new_mentions_comment: String,
    pub busy: bool,
    pub trigger_at: i64,
}

impl DigestRow {
    pub fn into_record(self) -> DigestResult<DigestRecord> {
        Ok(DigestRecord {
            id: self.id,
            user_id: self.user_id,
            org_id: self.org_id,
            notification_count: self.notification_count,
            new_recognitions: serde_json::from_str(&self.new_recognitions)?,
            new_comments: serde_json::from_str(&self.new_comments)?,
            new_likes_feed_item: serde_json::from_str(&self.new_likes_feed_item)?,
            new_likes_comment: serde_json::from_str(&self.new_likes_comment)?,
            new_mentions_feed_item: serde_json::from_str(&self.new_mentions_feed_item)?,
            new_mentions_comment: serde_json::from_str(&self.new_mentions_comment)?,
            busy: self.busy,
            trigger_at: from_millis(self.trigger_at),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrganisationRow {
    pub id: String,
    pub name: String,
    pub is_demo: bool,
}

impl From<OrganisationRow> for Organisation {
    fn from(row: OrganisationRow) -> Self {
        Organisation {
            id: row.id,
            name: row.name,
            is_demo: row.is_demo,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub org_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: String,
}

impl UserRow {
    pub fn into_user(self) -> DigestResult<User> {
        Ok(User {
            id: self.id,
            org_id: self.org_id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            roles: serde_json::from_str(&self.roles)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedItemRow {
    pub id: String,
    pub org_id: String,
    pub author_id: String,
    pub feed_type: String,
    pub cc_element_id: String,
    pub story: Option<String>,
    pub note: Option<String>,
    pub mentions_ids: String,
    pub recipient_ids: String,
    pub created_at: i64,
}

impl FeedItemRow {
    pub fn into_feed_item(self) -> DigestResult<FeedItem> {
        // Unknown types are treated as stories; the table CHECK keeps this rare.
        let feed_type = FeedType::parse(&self.feed_type).unwrap_or(FeedType::Story);
        Ok(FeedItem {
            id: self.id,
            org_id: self.org_id,
            author_id: self.author_id,
            feed_type,
            cc_element_id: self.cc_element_id,
            story: self.story,
            note: self.note,
            mentions_ids: serde_json::from_str(&self.mentions_ids)?,
            recipient_ids: serde_json::from_str(&self.recipient_ids)?,
            created_at: from_millis(self.created_at),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub id: String,
    pub org_id: String,
    pub feed_item_id: String,
    pub author_id: String,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            org_id: row.org_id,
            feed_item_id: row.feed_item_id,
            author_id: row.author_id,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CcElementRow {
    pub id: String,
    pub narrative: String,
}

impl From<CcElementRow> for CcElement {
    fn from(row: CcElementRow) -> Self {
        CcElement {
            id: row.id,
            narrative: row.narrative,
        }
    }
}
