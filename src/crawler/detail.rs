//! Detail page enrichment
//!
//! Fetches a post's permalink and pulls the first post body out of it. Any
//! failure degrades to empty content so the listing summary is never lost.

use crate::crawler::fetcher::PageFetcher;
use crate::record::DetailContent;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// Fragments that mark a text node as forum chrome rather than post content
const BOILERPLATE_MARKERS: &[&str] = &["下载附件", "360社区", "上传", "本帖最后由", "编辑"];

static FILE_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(\d+(?:\.\d+)?\s*(?:KB|MB|B)\)$").expect("file size pattern is valid")
});

static CJK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{4e00}-\u{9fff}]").expect("CJK pattern is valid"));

/// Image attributes in order of preference: full size, lazy-load, plain
const IMAGE_ATTRIBUTES: &[&str] = &["zoomfile", "file", "src"];

/// Fetches detail pages and extracts their content
#[derive(Debug, Clone)]
pub struct Enricher {
    fetcher: PageFetcher,
    base_url: Url,
}

impl Enricher {
    pub fn new(fetcher: PageFetcher, base_url: Url) -> Self {
        Self { fetcher, base_url }
    }

    /// Fetches `detail_url` and extracts body text and images
    ///
    /// Never fails: a missing URL, fetch failure or unexpected markup all
    /// yield empty content.
    pub async fn enrich(&self, detail_url: &str) -> DetailContent {
        if detail_url.is_empty() {
            tracing::debug!("Post has no detail URL, skipping enrichment");
            return DetailContent::default();
        }

        match self.fetcher.fetch(detail_url).await {
            Ok(html) => extract_detail(&html, &self.base_url),
            Err(e) => {
                tracing::warn!(
                    url = detail_url,
                    error = %e,
                    "Detail fetch failed, storing summary only"
                );
                DetailContent::default()
            }
        }
    }
}

/// Extracts body text and image URLs from a detail page
///
/// Only the first post body (`td.t_f`) is read. Text nodes are trimmed,
/// boilerplate is dropped and the rest joined with newlines. Images use
/// the best available attribute, skip `.gif` placeholders and are resolved
/// against `base_url`.
pub fn extract_detail(html: &str, base_url: &Url) -> DetailContent {
    let document = Html::parse_document(html);

    let Ok(body_selector) = Selector::parse("td.t_f") else {
        return DetailContent::default();
    };
    let Some(body) = document.select(&body_selector).next() else {
        tracing::debug!("Detail page has no post body");
        return DetailContent::default();
    };

    let body_text = body
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty() && !is_boilerplate(t))
        .collect::<Vec<_>>()
        .join("\n");

    let mut image_urls: Vec<String> = Vec::new();
    if let Ok(img_selector) = Selector::parse("img") {
        for img in body.select(&img_selector) {
            let Some(src) = IMAGE_ATTRIBUTES
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty())
            else {
                continue;
            };

            let Ok(url) = base_url.join(src) else {
                tracing::debug!(src, "Skipping unresolvable image URL");
                continue;
            };

            if url.path().to_ascii_lowercase().ends_with(".gif") {
                continue;
            }

            let url = url.to_string();
            if !image_urls.contains(&url) {
                image_urls.push(url);
            }
        }
    }

    DetailContent {
        body_text,
        image_urls,
    }
}

/// Returns true for attachment notices, size annotations and file names
fn is_boilerplate(text: &str) -> bool {
    BOILERPLATE_MARKERS.iter().any(|m| text.contains(m))
        || FILE_SIZE.is_match(text)
        || (text.contains('.') && !CJK.is_match(text))
}
