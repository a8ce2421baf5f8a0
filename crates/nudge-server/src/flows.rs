//! Session payloads for the two interactive flows.

use nudge_core::session::SessionPayload;
use serde::{Deserialize, Serialize};

use crate::collaborators::Card;

/// Paging through an owner's repositories one card at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselSession {
    pub owner: String,
    pub repos: Vec<String>,
    pub index: usize,
}

impl SessionPayload for CarouselSession {
    const KIND: &'static str = "carousel";
}

impl CarouselSession {
    pub fn new(owner: impl Into<String>, repos: Vec<String>) -> Self {
        Self {
            owner: owner.into(),
            repos,
            index: 0,
        }
    }

    pub fn next(&mut self) {
        if self.index + 1 < self.repos.len() {
            self.index += 1;
        }
    }

    pub fn prev(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    /// Drop the current repository. `None` when nothing is left.
    pub fn without_current(&self) -> Option<Self> {
        let mut repos = self.repos.clone();
        if self.index < repos.len() {
            repos.remove(self.index);
        }
        if repos.is_empty() {
            return None;
        }
        Some(Self {
            owner: self.owner.clone(),
            index: self.index.min(repos.len() - 1),
            repos,
        })
    }

    pub fn card(&self, session_id: &str, version: u64) -> Card {
        let text = match self.repos.get(self.index) {
            Some(repo) => format!(
                "{repo} ({} of {}): what would it take to ship this week?",
                self.index + 1,
                self.repos.len()
            ),
            None => "No repositories left.".to_string(),
        };
        Card {
            session_id: session_id.to_string(),
            version,
            text,
            actions: ["prev", "next", "skip", "done"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// A generated image waiting for the owner to approve or reject it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageApprovalSession {
    pub owner: String,
    pub image_url: String,
    pub caption: String,
}

impl SessionPayload for ImageApprovalSession {
    const KIND: &'static str = "image_approval";
}

impl ImageApprovalSession {
    pub fn card(&self, session_id: &str, version: u64) -> Card {
        Card {
            session_id: session_id.to_string(),
            version,
            text: format!("Post this? {}\n{}", self.caption, self.image_url),
            actions: vec!["approve".to_string(), "reject".to_string()],
        }
    }
}
