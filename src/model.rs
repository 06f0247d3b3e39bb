use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Chat identifier of one delivery target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Recipient(pub i64);

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Recipient {
    fn from(id: i64) -> Self {
        Recipient(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(reqwest::Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn url(text: impl Into<String>, url: reqwest::Url) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url),
        }
    }

    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }
}

/// Message content shared read-only by every send of one run.
///
/// `text` is already rendered in Bot-API HTML; `image` is a Telegram file id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub text: String,
    pub image: Option<String>,
    pub buttons: Vec<Vec<Button>>,
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, file_id: impl Into<String>) -> Self {
        self.image = Some(file_id.into());
        self
    }

    pub fn with_buttons(mut self, rows: Vec<Vec<Button>>) -> Self {
        self.buttons = rows;
        self
    }

    pub fn has_buttons(&self) -> bool {
        self.buttons.iter().any(|row| !row.is_empty())
    }
}

/// Why a recipient can never receive the message in this run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Blocked,
    NotFound,
    RedirectLimit,
    Unclassified,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Blocked => "blocked",
            FailureKind::NotFound => "not_found",
            FailureKind::RedirectLimit => "redirect_limit",
            FailureKind::Unclassified => "unclassified",
        }
    }
}

/// Classified result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    PermanentlyFailed { kind: FailureKind, reason: String },
    Retryable { wait: Duration },
    Redirected { new_recipient: Recipient },
}

impl DeliveryOutcome {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        DeliveryOutcome::PermanentlyFailed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Final state a recipient reaches within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Delivered,
    Failed(FailureKind),
}
