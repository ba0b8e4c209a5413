use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub telegram_id: Option<String>,
    pub reg_date: DateTime<Utc>,
}

impl User {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn telegram_id(&self) -> Option<&str> {
        self.telegram_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Nickname, or the local part of the email address when none is set.
    pub fn display_name(&self) -> String {
        if let Some(nickname) = self.nickname.as_deref().filter(|n| !n.trim().is_empty()) {
            return nickname.to_string();
        }
        self.email()
            .and_then(|email| email.split('@').next())
            .unwrap_or_default()
            .to_string()
    }
}
