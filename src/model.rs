use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedType {
    Story,
    Recognition,
}

impl FeedType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Story" => Some(FeedType::Story),
            "Recognition" => Some(FeedType::Recognition),
            _ => None,
        }
    }
}

/// Which of the six digest sequences an entry lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DigestKind {
    Recognition,
    Comment,
    LikeFeedItem,
    LikeComment,
    MentionFeedItem,
    MentionComment,
}

impl DigestKind {
    /// Recognitions and mentions make the digest eligible for sending at once.
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            DigestKind::Recognition | DigestKind::MentionFeedItem | DigestKind::MentionComment
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionEntry {
    pub feed_item_id: String,
    pub author_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CommentEntry {
    pub comment_id: String,
    pub author_id: String,
    pub feed_item_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemLikeEntry {
    pub feed_item_id: String,
    pub liker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CommentLikeEntry {
    pub comment_id: String,
    pub liker_id: String,
    pub feed_item_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemMentionEntry {
    pub feed_item_id: String,
    pub author_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct CommentMentionEntry {
    pub comment_id: String,
    pub author_id: String,
    pub feed_item_id: String,
}

/// A single event pushed into a digest by the increment path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestEntry {
    Recognition(RecognitionEntry),
    Comment(CommentEntry),
    LikeFeedItem(FeedItemLikeEntry),
    LikeComment(CommentLikeEntry),
    MentionFeedItem(FeedItemMentionEntry),
    MentionComment(CommentMentionEntry),
}

impl DigestEntry {
    pub fn kind(&self) -> DigestKind {
        match self {
            DigestEntry::Recognition(_) => DigestKind::Recognition,
            DigestEntry::Comment(_) => DigestKind::Comment,
            DigestEntry::LikeFeedItem(_) => DigestKind::LikeFeedItem,
            DigestEntry::LikeComment(_) => DigestKind::LikeComment,
            DigestEntry::MentionFeedItem(_) => DigestKind::MentionFeedItem,
            DigestEntry::MentionComment(_) => DigestKind::MentionComment,
        }
    }
}

/// Selects the like entries removed by the decrement path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeKey {
    FeedItem { feed_item_id: String, liker_id: String },
    Comment { comment_id: String, liker_id: String },
}

/// Persisted digest for one (user, organisation) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DigestRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    pub notification_count: i64,
    pub new_recognitions: Vec<RecognitionEntry>,
    pub new_comments: Vec<CommentEntry>,
    pub new_likes_feed_item: Vec<FeedItemLikeEntry>,
    pub new_likes_comment: Vec<CommentLikeEntry>,
    pub new_mentions_feed_item: Vec<FeedItemMentionEntry>,
    pub new_mentions_comment: Vec<CommentMentionEntry>,
    pub busy: bool,
    pub trigger_at: DateTime<Utc>,
}

impl DigestRecord {
    pub fn pending_len(&self) -> usize {
        self.new_recognitions.len()
            + self.new_comments.len()
            + self.new_likes_feed_item.len()
            + self.new_likes_comment.len()
            + self.new_mentions_feed_item.len()
            + self.new_mentions_comment.len()
    }

    /// Append an entry and bump the count. Duplicates are kept; consumers
    /// dedup when they read the digest.
    pub fn push(&mut self, entry: DigestEntry, now: DateTime<Utc>) {
        let priority = entry.kind().is_high_priority();
        match entry {
            DigestEntry::Recognition(e) => self.new_recognitions.push(e),
            DigestEntry::Comment(e) => self.new_comments.push(e),
            DigestEntry::LikeFeedItem(e) => self.new_likes_feed_item.push(e),
            DigestEntry::LikeComment(e) => self.new_likes_comment.push(e),
            DigestEntry::MentionFeedItem(e) => self.new_mentions_feed_item.push(e),
            DigestEntry::MentionComment(e) => self.new_mentions_comment.push(e),
        }
        self.notification_count += 1;
        if priority {
            self.trigger_at = now;
        }
    }

    /// Remove every like matching `key`, decrementing the count by the number
    /// removed. Returns that number.
    pub fn remove_likes(&mut self, key: &LikeKey) -> usize {
        let removed = match key {
            LikeKey::FeedItem {
                feed_item_id,
                liker_id,
            } => {
                let before = self.new_likes_feed_item.len();
                self.new_likes_feed_item
                    .retain(|l| !(&l.feed_item_id == feed_item_id && &l.liker_id == liker_id));
                before - self.new_likes_feed_item.len()
            }
            LikeKey::Comment {
                comment_id,
                liker_id,
            } => {
                let before = self.new_likes_comment.len();
                self.new_likes_comment
                    .retain(|l| !(&l.comment_id == comment_id && &l.liker_id == liker_id));
                before - self.new_likes_comment.len()
            }
        };
        self.notification_count -= removed as i64;
        removed
    }

    /// Count the likes `remove_likes` would take out, without mutating.
    pub fn count_likes(&self, key: &LikeKey) -> usize {
        match key {
            LikeKey::FeedItem {
                feed_item_id,
                liker_id,
            } => self
                .new_likes_feed_item
                .iter()
                .filter(|l| &l.feed_item_id == feed_item_id && &l.liker_id == liker_id)
                .count(),
            LikeKey::Comment {
                comment_id,
                liker_id,
            } => self
                .new_likes_comment
                .iter()
                .filter(|l| &l.comment_id == comment_id && &l.liker_id == liker_id)
                .count(),
        }
    }
}

/// Digest contents handed to the sender by `take_pending`. Like sequences are
/// de-duplicated; everything else is passed through in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingDigest {
    pub digest_id: String,
    pub new_recognitions: Vec<RecognitionEntry>,
    pub new_comments: Vec<CommentEntry>,
    pub new_likes_feed_item: Vec<FeedItemLikeEntry>,
    pub new_likes_comment: Vec<CommentLikeEntry>,
    pub new_mentions_feed_item: Vec<FeedItemMentionEntry>,
    pub new_mentions_comment: Vec<CommentMentionEntry>,
}

impl PendingDigest {
    pub fn is_empty(&self) -> bool {
        self.new_recognitions.is_empty()
            && self.new_comments.is_empty()
            && self.new_likes_feed_item.is_empty()
            && self.new_likes_comment.is_empty()
            && self.new_mentions_feed_item.is_empty()
            && self.new_mentions_comment.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub is_demo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub org_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub org_id: String,
    pub author_id: String,
    pub feed_type: FeedType,
    pub cc_element_id: String,
    pub story: Option<String>,
    pub note: Option<String>,
    pub mentions_ids: Vec<String>,
    pub recipient_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedItem {
    /// Whether `user_id` should see this item in the periodic update. Authors,
    /// mentioned users and recognition recipients are already notified through
    /// the digest path.
    pub fn is_eligible_for(&self, user_id: &str) -> bool {
        if self.author_id == user_id {
            return false;
        }
        if self.mentions_ids.iter().any(|m| m == user_id) {
            return false;
        }
        if self.feed_type == FeedType::Recognition && self.recipient_ids.iter().any(|r| r == user_id)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub org_id: String,
    pub feed_item_id: String,
    pub author_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CcElement {
    pub id: String,
    pub narrative: String,
}
