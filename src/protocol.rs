use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ProblemView, Verdict};

/// Outbound frame. Only the fields relevant to `kind` are serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<ProblemView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Envelope {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status: None,
            msg: None,
            problem: None,
            result: None,
            text: None,
            from: None,
        }
    }

    fn with_status(mut self, status: &str, msg: impl Into<String>) -> Self {
        self.status = Some(status.to_string());
        self.msg = Some(msg.into());
        self
    }

    pub fn waiting() -> Self {
        Self::new("status").with_status("waiting", "Waiting for an opponent...")
    }

    pub fn problem_ready(problem: ProblemView) -> Self {
        let mut envelope =
            Self::new("problem").with_status("ready", "Match found! Here's your problem:");
        envelope.problem = Some(problem);
        envelope
    }

    pub fn judged(verdict: Verdict) -> Self {
        let msg = format!("Passed {}/{} test cases", verdict.passed, verdict.total);
        let mut envelope = Self::new("result").with_status("judged", msg);
        envelope.result = Some(verdict);
        envelope
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new("error").with_status("error", msg)
    }

    pub fn win() -> Self {
        Self::new("game_end").with_status("win", "Congratulations! You won the match!")
    }

    pub fn lose() -> Self {
        Self::new("game_end").with_status("lose", "You lost! Your opponent solved the problem first.")
    }

    pub fn win_by_forfeit() -> Self {
        Self::new("game_end").with_status("win", "You won! Your opponent disconnected.")
    }

    pub fn chat_from_opponent(text: String) -> Self {
        let mut envelope = Self::new("chat");
        envelope.text = Some(text);
        envelope.from = Some("opponent".to_string());
        envelope
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Submit { code: String },
    Chat { text: String },
    Unknown { kind: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message has no type field")]
    MissingType,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl Inbound {
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let raw: RawInbound =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = raw.kind.ok_or(ProtocolError::MissingType)?;

        match kind.as_str() {
            "submit" => Ok(Self::Submit {
                code: raw.code.unwrap_or_default(),
            }),
            "chat" => Ok(Self::Chat {
                text: raw.text.unwrap_or_default(),
            }),
            _ => Ok(Self::Unknown { kind }),
        }
    }
}
