//! Read-only access to the data this crate consumes but does not own:
//! organisations, users, feed items, comments and CC elements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{self, Pool};
use crate::error::DigestResult;
use crate::model::{CcElement, Comment, FeedItem, Organisation, User};

#[async_trait]
pub trait Directory: Send + Sync {
    async fn comment(&self, id: &str) -> DigestResult<Option<Comment>>;

    async fn feed_item(&self, id: &str) -> DigestResult<Option<FeedItem>>;

    async fn organisations(&self) -> DigestResult<Vec<Organisation>>;

    /// Items created in `[start, end)`.
    async fn feed_items_in_window(
        &self,
        org_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DigestResult<Vec<FeedItem>>;

    async fn users_in_org(&self, org_id: &str) -> DigestResult<Vec<User>>;

    async fn user(&self, id: &str) -> DigestResult<Option<User>>;

    async fn cc_element(&self, id: &str) -> DigestResult<Option<CcElement>>;
}

#[async_trait]
impl Directory for Pool {
    async fn comment(&self, id: &str) -> DigestResult<Option<Comment>> {
        db::fetch_comment(self, id).await
    }

    async fn feed_item(&self, id: &str) -> DigestResult<Option<FeedItem>> {
        db::fetch_feed_item(self, id).await
    }

    async fn organisations(&self) -> DigestResult<Vec<Organisation>> {
        db::list_organisations(self).await
    }

    async fn feed_items_in_window(
        &self,
        org_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DigestResult<Vec<FeedItem>> {
        db::feed_items_in_window(self, org_id, start, end).await
    }

    async fn users_in_org(&self, org_id: &str) -> DigestResult<Vec<User>> {
        db::users_in_org(self, org_id).await
    }

    async fn user(&self, id: &str) -> DigestResult<Option<User>> {
        db::fetch_user(self, id).await
    }

    async fn cc_element(&self, id: &str) -> DigestResult<Option<CcElement>> {
        db::fetch_cc_element(self, id).await
    }
}
