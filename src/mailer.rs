use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config;

/// Rendered data for one periodic update email. Template rendering and
/// transport belong to the relay that receives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmail {
    pub recipient_id: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub recipient: RecipientName,
    pub organisation_id: String,
    pub organisation: String,
    pub organisation_possessive: String,
    pub app_link: String,
    pub feeds: Vec<FeedItemSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecipientName {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemSummary {
    pub feed_item_id: String,
    pub author: String,
    pub narrative: String,
    pub is_story: bool,
    pub is_recognition: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_recipients: Option<String>,
    pub link: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_update(&self, email: &UpdateEmail) -> Result<()>;
}

/// Posts update emails as JSON to a mail relay.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    endpoint: Url,
    token: String,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpMailer {
    pub fn new(endpoint: Url, token: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("activity-digest/0.1")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn from_config(cfg: &config::Mailer) -> Result<Self> {
        let endpoint = Url::parse(&cfg.endpoint)
            .with_context(|| format!("invalid mailer endpoint {}", cfg.endpoint))?;
        Self::new(endpoint, cfg.token.clone())
    }

    pub fn build_request(&self, email: &UpdateEmail) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(email)
            .build()
            .context("failed to build mail relay request")
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_update(&self, email: &UpdateEmail) -> Result<()> {
        let request = self.build_request(email)?;
        let resp = self
            .http
            .execute(request)
            .await
            .context("mail relay request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("mail relay returned {}: {}", status, body));
        }
        debug!(to = %email.to, items = email.feeds.len(), "update email accepted by relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_email() -> UpdateEmail {
        UpdateEmail {
            recipient_id: "u1".into(),
            to: "Ada Lovelace <ada@example.com>".into(),
            from: "Salpulse <notifications@salpulse.com>".into(),
            subject: "What's been happening on Salpulse".into(),
            recipient: RecipientName {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
            },
            organisation_id: "o1".into(),
            organisation: "Acme".into(),
            organisation_possessive: "Acme's".into(),
            app_link: "https://app.example.com/".into(),
            feeds: vec![FeedItemSummary {
                feed_item_id: "f1".into(),
                author: "Bob Smith".into(),
                narrative: "Customer first".into(),
                is_story: true,
                is_recognition: false,
                content: Some("hello".into()),
                recognition_recipients: None,
                link: "https://app.example.com/feed/cc1/f1".into(),
            }],
        }
    }

    #[test]
    fn request_carries_token_and_camel_case_body() {
        let mailer = HttpMailer::new(
            Url::parse("https://relay.example.com/v1/send").unwrap(),
            "secret".into(),
        )
        .unwrap();
        let req = mailer.build_request(&sample_email()).unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "https://relay.example.com/v1/send");
        assert_eq!(
            req.headers().get("Authorization").unwrap().to_str().unwrap(),
            "Bearer secret"
        );
        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["organisationPossessive"], "Acme's");
        assert_eq!(json["feeds"][0]["isStory"], true);
        assert!(json["feeds"][0].get("recognitionRecipients").is_none());
    }

    #[test]
    fn from_config_rejects_bad_endpoint() {
        let cfg = config::Mailer {
            endpoint: "not a url".into(),
            token: "t".into(),
            from: "f".into(),
            subject: "s".into(),
            test_mode: false,
        };
        assert!(HttpMailer::from_config(&cfg).is_err());
    }
}
