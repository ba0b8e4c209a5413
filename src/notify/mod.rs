//! New-episode notifications over email and Telegram.
//!
//! Both channels are best-effort: they run side by side, fail independently and
//! report their outcome instead of returning an error.

mod email;
mod telegram;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::User;

pub use email::{render_update_email, ResendMailer};
pub use telegram::{format_update_message, TelegramBot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<()>;
}

#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str, buttons: &[LinkButton]) -> Result<()>;
}

/// What to tell a user about one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNotice {
    pub keyword: String,
    pub update_count: i64,
    pub titles: Vec<String>,
    pub link: String,
}

impl UpdateNotice {
    pub fn subject(&self) -> String {
        format!("#{} has new podcasts update", self.keyword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Channel not configured or the user has no address for it.
    Skipped,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub email: ChannelOutcome,
    pub chat: ChannelOutcome,
}

impl DeliveryReport {
    pub const NOT_ATTEMPTED: DeliveryReport = DeliveryReport {
        email: ChannelOutcome::Skipped,
        chat: ChannelOutcome::Skipped,
    };

    pub fn attempted(&self) -> bool {
        self.email != ChannelOutcome::Skipped || self.chat != ChannelOutcome::Skipped
    }

    pub fn delivered(&self) -> bool {
        self.email == ChannelOutcome::Sent || self.chat == ChannelOutcome::Sent
    }
}

#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    mailer: Option<Arc<dyn Mailer>>,
    chat: Option<Arc<dyn ChatSender>>,
    site_url: String,
}

impl NotificationDispatcher {
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            mailer: None,
            chat: None,
            site_url: site_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatSender>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Page on the site listing a user's items for `keyword`.
    pub fn subscription_link(&self, user_id: &str, keyword: &str) -> String {
        format!(
            "{}/subscription/{}/{}",
            self.site_url,
            urlencoding::encode(user_id),
            urlencoding::encode(keyword)
        )
    }

    pub async fn dispatch(&self, user: &User, notice: &UpdateNotice) -> DeliveryReport {
        let (email, chat) = futures::join!(self.send_email(user, notice), self.send_chat(user, notice));
        DeliveryReport { email, chat }
    }

    async fn send_email(&self, user: &User, notice: &UpdateNotice) -> ChannelOutcome {
        let (Some(mailer), Some(to)) = (&self.mailer, user.email()) else {
            return ChannelOutcome::Skipped;
        };

        let result: Result<()> = async {
            let html = render_update_email(&user.display_name(), notice)?;
            let message = EmailMessage {
                to: to.to_string(),
                subject: notice.subject(),
                html,
            };
            mailer.send_email(&message).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!("Sent update email for {:?} to {}", notice.keyword, to);
                ChannelOutcome::Sent
            }
            Err(e) => {
                tracing::error!(
                    "Failed to send update email to {} for {:?} ({} new): {}",
                    to,
                    notice.keyword,
                    notice.update_count,
                    e
                );
                ChannelOutcome::Failed
            }
        }
    }

    async fn send_chat(&self, user: &User, notice: &UpdateNotice) -> ChannelOutcome {
        let (Some(chat), Some(chat_id)) = (&self.chat, user.telegram_id()) else {
            return ChannelOutcome::Skipped;
        };

        let text = format_update_message(notice);
        let buttons = [LinkButton {
            text: "Check Now".to_string(),
            url: notice.link.clone(),
        }];

        match chat.send_message(chat_id, &text, &buttons).await {
            Ok(()) => {
                tracing::debug!("Sent update message for {:?} to chat {}", notice.keyword, chat_id);
                ChannelOutcome::Sent
            }
            Err(e) => {
                tracing::error!(
                    "Failed to send update message to chat {} for {:?}: {}",
                    chat_id,
                    notice.keyword,
                    e
                );
                ChannelOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{user, RecordingChat, RecordingMailer};

    fn notice() -> UpdateNotice {
        UpdateNotice {
            keyword: "startup".to_string(),
            update_count: 3,
            titles: vec!["One".to_string(), "Two".to_string()],
            link: "https://porkast.com/subscription/u1/startup".to_string(),
        }
    }

    #[tokio::test]
    async fn sends_both_channels() {
        let mailer = Arc::new(RecordingMailer::default());
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = NotificationDispatcher::new("https://porkast.com")
            .with_mailer(mailer.clone())
            .with_chat(chat.clone());

        let mut u = user("u1", Some("ada@example.com"));
        u.telegram_id = Some("42".to_string());

        let report = dispatcher.dispatch(&u, &notice()).await;
        assert_eq!(report.email, ChannelOutcome::Sent);
        assert_eq!(report.chat, ChannelOutcome::Sent);
        assert!(report.delivered());

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ada@example.com");
        assert_eq!(sent[0].subject, "#startup has new podcasts update");
        assert!(sent[0].html.contains("ada"));

        let messages = chat.sent();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "42");
        assert_eq!(messages[0].2[0].text, "Check Now");
    }

    #[tokio::test]
    async fn channel_failures_are_independent() {
        let mailer = Arc::new(RecordingMailer::failing());
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = NotificationDispatcher::new("https://porkast.com")
            .with_mailer(mailer)
            .with_chat(chat.clone());

        let mut u = user("u1", Some("ada@example.com"));
        u.telegram_id = Some("42".to_string());

        let report = dispatcher.dispatch(&u, &notice()).await;
        assert_eq!(report.email, ChannelOutcome::Failed);
        assert_eq!(report.chat, ChannelOutcome::Sent);
        assert!(report.delivered());
        assert_eq!(chat.sent().len(), 1);
    }

    #[tokio::test]
    async fn chat_failure_does_not_block_email() {
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = NotificationDispatcher::new("https://porkast.com")
            .with_mailer(mailer.clone())
            .with_chat(Arc::new(RecordingChat::failing()));

        let mut u = user("u1", Some("ada@example.com"));
        u.telegram_id = Some("42".to_string());

        let report = dispatcher.dispatch(&u, &notice()).await;
        assert_eq!(report.email, ChannelOutcome::Sent);
        assert_eq!(report.chat, ChannelOutcome::Failed);
        assert!(report.attempted());
        assert!(report.delivered());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_chat_identity_skips_chat() {
        let chat = Arc::new(RecordingChat::default());
        let dispatcher = NotificationDispatcher::new("https://porkast.com").with_chat(chat.clone());

        let report = dispatcher
            .dispatch(&user("u1", Some("ada@example.com")), &notice())
            .await;
        assert_eq!(report, DeliveryReport::NOT_ATTEMPTED);
        assert!(!report.attempted());
        assert!(chat.sent().is_empty());
    }

    #[test]
    fn subscription_link_is_encoded() {
        let dispatcher = NotificationDispatcher::new("https://porkast.com/");
        assert_eq!(
            dispatcher.subscription_link("u1", "machine learning"),
            "https://porkast.com/subscription/u1/machine%20learning"
        );
    }
}
