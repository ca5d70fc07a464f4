//! Periodic "what's been happening" updates.
//!
//! Each cycle claims the window `[last_sent_at, now)` from the cursor before
//! anything is sent, then walks organisations and users one at a time and
//! mails every user the feed items they have not already been notified about.
//! If the process dies after the claim, the rest of that window is never sent.
//! The cursor only moves forward; a cycle whose end is not past it sends
//! nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::directory::Directory;
use crate::error::{DigestError, DigestResult};
use crate::mailer::{FeedItemSummary, Mailer, RecipientName, UpdateEmail};
use crate::model::{FeedItem, FeedType, Organisation, User};

/// Global pointer to the end of the last processed window.
#[derive(Debug, Clone)]
pub struct WindowCursor {
    pool: Pool,
}

impl WindowCursor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Claim `[previous, end)`. None on the very first call. The claim is
    /// committed when this returns.
    pub async fn claim(&self, end: DateTime<Utc>) -> DigestResult<Option<DateTime<Utc>>> {
        db::get_and_set_last_sent_at(&self.pool, end).await
    }

    pub async fn last_sent_at(&self) -> DigestResult<Option<DateTime<Utc>>> {
        db::last_sent_at(&self.pool).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatesSettings {
    pub base_url: String,
    pub item_trim_length: usize,
    pub organisation_trim_length: usize,
    pub demo_org_names: Vec<String>,
    pub from: String,
    pub subject: String,
}

impl UpdatesSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let prefix = if cfg.mailer.test_mode { "TEST " } else { "" };
        Self {
            base_url: cfg.app.base_url.trim_end_matches('/').to_string(),
            item_trim_length: cfg.updates.item_trim_length,
            organisation_trim_length: cfg.updates.organisation_trim_length,
            demo_org_names: cfg.updates.demo_org_names.clone(),
            from: format!("{prefix}{}", cfg.mailer.from),
            subject: format!("{prefix}{}", cfg.mailer.subject),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No cursor existed yet and it has now been initialised, or `end` was
    /// not past the stored cursor.
    Skipped,
    Processed(CycleReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub organisations_with_updates: usize,
    pub emails_sent: usize,
    pub send_failures: usize,
    /// Organisations abandoned for this window after a store error.
    pub organisation_failures: usize,
}

/// Feed item fields shared by every reader in the organisation.
struct PreparedItem<'a> {
    item: &'a FeedItem,
    author: String,
    narrative: String,
    content: Option<String>,
    recognition_recipients: Vec<(String, String)>,
    link: String,
}

pub struct UpdatesProcessor {
    cursor: WindowCursor,
    directory: Arc<dyn Directory>,
    mailer: Arc<dyn Mailer>,
    settings: UpdatesSettings,
}

impl UpdatesProcessor {
    pub fn new(
        cursor: WindowCursor,
        directory: Arc<dyn Directory>,
        mailer: Arc<dyn Mailer>,
        settings: UpdatesSettings,
    ) -> Self {
        Self {
            cursor,
            directory,
            mailer,
            settings,
        }
    }

    pub fn cursor(&self) -> &WindowCursor {
        &self.cursor
    }

    pub async fn process(&self) -> DigestResult<CycleOutcome> {
        self.process_at(Utc::now()).await
    }

    #[instrument(skip_all, fields(window_end = %end))]
    pub async fn process_at(&self, end: DateTime<Utc>) -> DigestResult<CycleOutcome> {
        let Some(start) = self.cursor.claim(end).await? else {
            info!("no previous update window; skipping this cycle");
            return Ok(CycleOutcome::Skipped);
        };
        if end <= start {
            warn!(window_start = %start, "window end is not past the cursor; skipping this cycle");
            return Ok(CycleOutcome::Skipped);
        }
        info!(window_start = %start, "claimed update window");

        let mut report = CycleReport {
            window_start: start,
            window_end: end,
            organisations_with_updates: 0,
            emails_sent: 0,
            send_failures: 0,
            organisation_failures: 0,
        };

        for org in self.directory.organisations().await? {
            let feeds = match self.directory.feed_items_in_window(&org.id, start, end).await {
                Ok(feeds) => feeds,
                Err(err) => {
                    report.organisation_failures += 1;
                    warn!(org = %org.name, ?err, "could not read feed items; skipping organisation");
                    continue;
                }
            };
            if feeds.is_empty() {
                info!(org = %org.name, "no updates");
                continue;
            }
            if self.is_demo(&org) {
                info!(org = %org.name, feeds = feeds.len(), "skipping demo organisation");
                continue;
            }
            info!(org = %org.name, feeds = feeds.len(), "feeds to update");
            report.organisations_with_updates += 1;
            if let Err(err) = self.process_org(&org, &feeds, &mut report).await {
                report.organisation_failures += 1;
                warn!(org = %org.name, ?err, "organisation update aborted");
            }
        }

        info!(
            emails_sent = report.emails_sent,
            send_failures = report.send_failures,
            organisation_failures = report.organisation_failures,
            organisations = report.organisations_with_updates,
            "update cycle finished"
        );
        Ok(CycleOutcome::Processed(report))
    }

    fn is_demo(&self, org: &Organisation) -> bool {
        org.is_demo || self.settings.demo_org_names.iter().any(|n| n == &org.name)
    }

    async fn process_org(
        &self,
        org: &Organisation,
        feeds: &[FeedItem],
        report: &mut CycleReport,
    ) -> DigestResult<()> {
        let mut prepared = Vec::with_capacity(feeds.len());
        for item in feeds {
            match self.prepare_item(org, item).await {
                Ok(p) => prepared.push(p),
                Err(err) => warn!(feed_item_id = %item.id, ?err, "dropping feed item from update"),
            }
        }

        for user in self.directory.users_in_org(&org.id).await? {
            let eligible: Vec<&PreparedItem> = prepared
                .iter()
                .filter(|p| p.item.is_eligible_for(&user.id))
                .collect();
            if eligible.is_empty() {
                continue;
            }
            let email = self.build_email(&user, org, &eligible);
            match self.mailer.send_update(&email).await {
                Ok(()) => {
                    report.emails_sent += 1;
                    info!(to = %email.to, items = email.feeds.len(), "update sent");
                }
                Err(err) => {
                    report.send_failures += 1;
                    warn!(recipient = %user.id, ?err, "update email failed");
                }
            }
        }
        Ok(())
    }

    async fn prepare_item<'a>(
        &self,
        org: &Organisation,
        item: &'a FeedItem,
    ) -> DigestResult<PreparedItem<'a>> {
        let cc = self
            .directory
            .cc_element(&item.cc_element_id)
            .await?
            .ok_or_else(|| DigestError::not_found("cc element", item.cc_element_id.clone()))?;
        let author = self
            .directory
            .user(&item.author_id)
            .await?
            .ok_or_else(|| DigestError::not_found("user", item.author_id.clone()))?;

        let text = match item.feed_type {
            FeedType::Story => item.story.as_deref(),
            FeedType::Recognition => item.note.as_deref(),
        };
        let content = text
            .filter(|t| !t.is_empty())
            .map(|t| trim_with_ellipsis(t, self.settings.item_trim_length));

        let mut recognition_recipients = Vec::new();
        if item.feed_type == FeedType::Recognition {
            for rid in &item.recipient_ids {
                match self.directory.user(rid).await? {
                    Some(u) if u.org_id == org.id => {
                        recognition_recipients.push((u.id.clone(), u.full_name()))
                    }
                    _ => {}
                }
            }
        }

        Ok(PreparedItem {
            item,
            author: author.full_name(),
            narrative: cc.narrative,
            content,
            recognition_recipients,
            link: format!("{}/feed/{}/{}", self.settings.base_url, cc.id, item.id),
        })
    }

    fn build_email(&self, user: &User, org: &Organisation, items: &[&PreparedItem]) -> UpdateEmail {
        let feeds = items
            .iter()
            .map(|p| {
                let is_recognition = p.item.feed_type == FeedType::Recognition;
                FeedItemSummary {
                    feed_item_id: p.item.id.clone(),
                    author: p.author.clone(),
                    narrative: p.narrative.clone(),
                    is_story: !is_recognition,
                    is_recognition,
                    content: p.content.clone(),
                    recognition_recipients: is_recognition
                        .then(|| comma_list_of_names(&p.recognition_recipients, &user.id)),
                    link: p.link.clone(),
                }
            })
            .collect();

        UpdateEmail {
            recipient_id: user.id.clone(),
            to: format!("{} <{}>", user.full_name(), user.email),
            from: self.settings.from.clone(),
            subject: self.settings.subject.clone(),
            recipient: RecipientName {
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
            },
            organisation_id: org.id.clone(),
            organisation: trim_with_ellipsis(&org.name, self.settings.organisation_trim_length),
            organisation_possessive: possessive(&org.name),
            app_link: format!("{}/", self.settings.base_url),
            feeds,
        }
    }
}

/// Keep the first `max_chars` characters and mark the cut with "...".
pub fn trim_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

pub fn possessive(name: &str) -> String {
    if name.ends_with('s') {
        format!("{name}'")
    } else {
        format!("{name}'s")
    }
}

/// "A", "A and B", "A, B and C"; the reader is listed as "you".
pub fn comma_list_of_names(people: &[(String, String)], reader_id: &str) -> String {
    let names: Vec<&str> = people
        .iter()
        .map(|(id, name)| if id == reader_id { "you" } else { name.as_str() })
        .collect();
    match names.split_last() {
        None => String::new(),
        Some((last, [])) => last.to_string(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}
