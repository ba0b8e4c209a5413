use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{EmailMessage, Mailer, UpdateNotice};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Template)]
#[template(path = "subscription_update.html")]
struct SubscriptionUpdateEmail<'a> {
    name: &'a str,
    keyword: &'a str,
    update_count: i64,
    titles: &'a [String],
    link: &'a str,
}

pub fn render_update_email(name: &str, notice: &UpdateNotice) -> Result<String> {
    let email = SubscriptionUpdateEmail {
        name,
        keyword: &notice.keyword,
        update_count: notice.update_count,
        titles: &notice.titles,
        link: &notice.link,
    };
    Ok(email.render()?)
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: String,
}

/// Transactional email over the Resend HTTP API.
pub struct ResendMailer {
    client: Client,
    api_key: String,
    from: String,
    api_url: String,
}

impl ResendMailer {
    pub fn new(api_key: String, from: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            from,
            api_url: RESEND_API_URL.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        let request = SendEmailRequest {
            from: &self.from,
            to: vec![message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::EmailApi(format!("HTTP {}: {}", status, error_text)));
        }

        let sent: SendEmailResponse = response.json().await?;
        tracing::debug!("Resend accepted email {}", sent.id);
        Ok(())
    }
}
