//! Trigger rules deciding which new records need analysis

use crate::config::TriggerConfig;
use crate::record::CanonicalRecord;
use std::collections::BTreeSet;
use std::fmt;

/// The first rule that matched a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReason {
    /// A keyword occurs in the title or body
    Keyword(String),

    /// The record carries images
    Images(usize),

    /// Reply count reached the threshold
    Replies(u64),

    /// View count reached the threshold
    Views(u64),
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(k) => write!(f, "keyword '{}'", k),
            Self::Images(n) => write!(f, "{} image(s)", n),
            Self::Replies(n) => write!(f, "{} replies", n),
            Self::Views(n) => write!(f, "{} views", n),
        }
    }
}

/// Configurable dispatch rules
///
/// A record is dispatched when any enabled rule matches. Keyword matching is
/// a case-insensitive substring test against title and body; thresholds
/// set to `None` are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRules {
    pub dispatch_on_images: bool,
    pub min_replies: Option<u64>,
    pub min_views: Option<u64>,
}

impl From<&TriggerConfig> for TriggerRules {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            dispatch_on_images: config.dispatch_on_images,
            min_replies: config.min_replies,
            min_views: config.min_views,
        }
    }
}

impl TriggerRules {
    /// Returns the reason `record` should be analyzed, if any
    pub fn evaluate(
        &self,
        record: &CanonicalRecord,
        keywords: &BTreeSet<String>,
    ) -> Option<TriggerReason> {
        if let Some(keyword) = matching_keyword(record, keywords) {
            return Some(TriggerReason::Keyword(keyword));
        }

        if self.dispatch_on_images && !record.image_urls.is_empty() {
            return Some(TriggerReason::Images(record.image_urls.len()));
        }

        if let Some(min) = self.min_replies {
            if record.reply_count >= min {
                return Some(TriggerReason::Replies(record.reply_count));
            }
        }

        if let Some(min) = self.min_views {
            if record.view_count >= min {
                return Some(TriggerReason::Views(record.view_count));
            }
        }

        None
    }

    pub fn should_dispatch(&self, record: &CanonicalRecord, keywords: &BTreeSet<String>) -> bool {
        self.evaluate(record, keywords).is_some()
    }
}

fn matching_keyword(record: &CanonicalRecord, keywords: &BTreeSet<String>) -> Option<String> {
    if keywords.is_empty() {
        return None;
    }

    let haystack = format!("{}\n{}", record.title, record.body_text).to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .find(|k| haystack.contains(&k.to_lowercase()))
        .map(str::to_string)
}
