use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{ChatSender, LinkButton, UpdateNotice};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

static MARKDOWN_SPECIAL: OnceLock<Option<Regex>> = OnceLock::new();

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Escapes every character Telegram's MarkdownV2 mode treats as markup.
pub fn escape_markdown_v2(text: &str) -> String {
    let special = MARKDOWN_SPECIAL.get_or_init(|| Regex::new(r"[_*\[\]()~`>#+\-=|{}.!\\]").ok());
    match special {
        Some(re) => re.replace_all(text, r"\$0").into_owned(),
        None => text.to_string(),
    }
}

pub fn format_update_message(notice: &UpdateNotice) -> String {
    let mut text = format!(
        "#{} has been updated, {} new episodes were added, click to check it out.\n",
        notice.keyword, notice.update_count
    );
    for (i, title) in notice.titles.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, title));
    }
    escape_markdown_v2(&text)
}

/// Telegram Bot API client.
pub struct TelegramBot {
    client: Client,
    token: String,
    api_url: String,
}

impl TelegramBot {
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token,
            api_url: TELEGRAM_API_URL.to_string(),
        })
    }
}

#[async_trait]
impl ChatSender for TelegramBot {
    async fn send_message(&self, chat_id: &str, text: &str, buttons: &[LinkButton]) -> Result<()> {
        let reply_markup = (!buttons.is_empty()).then(|| InlineKeyboardMarkup {
            inline_keyboard: vec![buttons
                .iter()
                .map(|b| InlineKeyboardButton {
                    text: &b.text,
                    url: &b.url,
                })
                .collect()],
        });

        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "MarkdownV2",
            reply_markup,
        };

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_url, self.token))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body: TelegramResponse = response.json().await?;
        if !status.is_success() || !body.ok {
            return Err(AppError::TelegramApi(format!(
                "HTTP {}: {}",
                status,
                body.description.unwrap_or_default()
            )));
        }

        Ok(())
    }
}
