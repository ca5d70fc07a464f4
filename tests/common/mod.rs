#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use activity_digest::db;
use activity_digest::mailer::{Mailer, UpdateEmail};
use activity_digest::LockPolicy;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Fresh file-backed database (WAL, busy timeout) with migrations applied.
/// Keep the TempDir alive for the duration of the test.
pub async fn setup_pool() -> (tempfile::TempDir, sqlx::SqlitePool) {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/digest.db", td.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (td, pool)
}

pub fn fast_policy() -> LockPolicy {
    LockPolicy {
        max_attempts: 2_000,
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub async fn insert_org(pool: &sqlx::SqlitePool, id: &str, name: &str, is_demo: bool) {
    sqlx::query("INSERT INTO organisations (id, name, is_demo) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(is_demo)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_user(pool: &sqlx::SqlitePool, id: &str, org_id: &str, first: &str, roles: &[&str]) {
    sqlx::query(
        "INSERT INTO users (id, org_id, first_name, last_name, email, roles) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(org_id)
    .bind(first)
    .bind("Tester")
    .bind(format!("{}@example.com", id.to_lowercase()))
    .bind(serde_json::to_string(roles).unwrap())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_cc_element(pool: &sqlx::SqlitePool, id: &str, org_id: &str, narrative: &str) {
    sqlx::query("INSERT INTO cc_elements (id, org_id, narrative) VALUES (?, ?, ?)")
        .bind(id)
        .bind(org_id)
        .bind(narrative)
        .execute(pool)
        .await
        .unwrap();
}

pub struct NewFeedItem<'a> {
    pub id: &'a str,
    pub org_id: &'a str,
    pub author_id: &'a str,
    pub feed_type: &'a str,
    pub cc_element_id: &'a str,
    pub text: Option<&'a str>,
    pub mentions: &'a [&'a str],
    pub recipients: &'a [&'a str],
    pub created_at: DateTime<Utc>,
}

impl<'a> NewFeedItem<'a> {
    pub fn story(id: &'a str, org_id: &'a str, author_id: &'a str, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            org_id,
            author_id,
            feed_type: "Story",
            cc_element_id: "cc1",
            text: Some("We shipped it"),
            mentions: &[],
            recipients: &[],
            created_at,
        }
    }
}

pub async fn insert_feed_item(pool: &sqlx::SqlitePool, item: NewFeedItem<'_>) {
    let (story, note) = if item.feed_type == "Story" {
        (item.text, None)
    } else {
        (None, item.text)
    };
    sqlx::query(
        "INSERT INTO feed_items (id, org_id, author_id, feed_type, cc_element_id, story, note, \
         mentions_ids, recipient_ids, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.id)
    .bind(item.org_id)
    .bind(item.author_id)
    .bind(item.feed_type)
    .bind(item.cc_element_id)
    .bind(story)
    .bind(note)
    .bind(serde_json::to_string(item.mentions).unwrap())
    .bind(serde_json::to_string(item.recipients).unwrap())
    .bind(item.created_at.timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_comment(pool: &sqlx::SqlitePool, id: &str, org_id: &str, feed_item_id: &str, author_id: &str) {
    sqlx::query("INSERT INTO comments (id, org_id, feed_item_id, author_id) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(org_id)
        .bind(feed_item_id)
        .bind(author_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn digest_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM notification_digests")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<UpdateEmail>>>,
    fail_for: Arc<HashSet<String>>,
}

impl RecordingMailer {
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            fail_for: Arc::new(recipients.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub async fn sent(&self) -> Vec<UpdateEmail> {
        self.sent.lock().await.clone()
    }

    /// Feed item ids mailed to `recipient_id`, in email order.
    pub async fn items_for(&self, recipient_id: &str) -> Option<Vec<String>> {
        self.sent
            .lock()
            .await
            .iter()
            .find(|e| e.recipient_id == recipient_id)
            .map(|e| e.feeds.iter().map(|f| f.feed_item_id.clone()).collect())
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send_update(&self, email: &UpdateEmail) -> Result<()> {
        if self.fail_for.contains(&email.recipient_id) {
            return Err(anyhow!("relay rejected {}", email.recipient_id));
        }
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}
