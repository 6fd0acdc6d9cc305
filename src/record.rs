//! Post data model
//!
//! A post moves through three shapes during one controller iteration:
//!
//! - `PostSummary`: what the listing page tells us about a post
//! - `EnrichedPost`: the summary plus body text and images from the detail page
//! - `CanonicalRecord`: the persisted unit, with normalized timestamps

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// A post as it appears on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSummary {
    /// The forum's own stable post identifier (natural key)
    pub id: String,

    pub title: String,
    pub author: String,

    /// Empty when the listing row has no category label
    pub category: String,

    /// Status badge text taken from the row's image `alt` attributes
    pub status_label: String,

    pub has_attachment: bool,

    /// Creation date exactly as the listing rendered it
    pub raw_created_at: String,

    pub view_count: u64,
    pub reply_count: u64,

    /// Absolute URL of the post's detail page (may be empty)
    pub detail_url: String,
}

/// Body text and images extracted from a post's detail page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailContent {
    pub body_text: String,
    pub image_urls: Vec<String>,
}

/// A listing summary combined with its detail page content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedPost {
    pub summary: PostSummary,
    pub body_text: String,
    pub image_urls: Vec<String>,
}

impl EnrichedPost {
    pub fn new(summary: PostSummary, detail: DetailContent) -> Self {
        Self {
            summary,
            body_text: detail.body_text,
            image_urls: detail.image_urls,
        }
    }

    /// Builds the record to persist.
    ///
    /// `created_at` must already be normalized; the raw listing string is
    /// kept alongside it for audit.
    pub fn into_record(
        self,
        created_at: DateTime<FixedOffset>,
        ingested_at: DateTime<Utc>,
    ) -> CanonicalRecord {
        let EnrichedPost {
            summary,
            body_text,
            image_urls,
        } = self;

        CanonicalRecord {
            natural_key: summary.id,
            title: summary.title,
            author: summary.author,
            category: summary.category,
            status_label: summary.status_label,
            has_attachment: summary.has_attachment,
            created_at,
            created_at_raw: summary.raw_created_at,
            ingested_at,
            view_count: summary.view_count,
            reply_count: summary.reply_count,
            url: summary.detail_url,
            body_text,
            image_urls,
            analyzed: false,
            analysis_ref: None,
        }
    }
}

/// The persisted unit, unique by `natural_key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub natural_key: String,
    pub title: String,
    pub author: String,
    pub category: String,
    pub status_label: String,
    pub has_attachment: bool,
    pub created_at: DateTime<FixedOffset>,
    pub created_at_raw: String,
    pub ingested_at: DateTime<Utc>,
    pub view_count: u64,
    pub reply_count: u64,
    pub url: String,
    pub body_text: String,
    pub image_urls: Vec<String>,

    /// Set only by the downstream analysis stage
    pub analyzed: bool,
    pub analysis_ref: Option<String>,
}
