//! Listing page parser
//!
//! This module extracts post summaries from a Discuz-style forum listing:
//! - Locating the current item rows (after `tbody#separatorline` when present)
//! - Reading category, title, author, date and counters from each row
//! - Deriving the status label and attachment flag from row icons

use crate::record::PostSummary;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

/// `alt` text of the icon Discuz renders for posts with attachments
pub const ATTACHMENT_MARKER: &str = "attach_img";

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// Parses a count the way forums render it
///
/// Thousands separators are stripped and the first digit run is taken, so
/// `"1,234 次"` is 1234. Missing or digit-free input is 0.
pub fn parse_int(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return 0;
    };

    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != '，').collect();
    DIGITS
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parses a listing page into post summaries, in page order
///
/// # Row Layout
///
/// Each current row is a `tbody` with the post id as its `id` attribute.
/// Fields are read from the second `div` inside `tr > th`:
///
/// | Field | Location |
/// |-------|----------|
/// | Category | `a[1] > span` (optional) |
/// | Title / detail link | `a[2]` with a category, else `a[1]` |
/// | Author | `div > span[1] > a` |
/// | Date | `div > span[3]` (inner `title` attribute preferred) |
/// | Replies / views | `div > a[1]` / `div > a[2]` |
/// | Status / attachment | `img` `alt` attributes |
///
/// Rows without an id are dropped and logged. Relative links are resolved
/// against `base_url`.
pub fn parse_listing(html: &str, base_url: &Url) -> Vec<PostSummary> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut posts = Vec::new();

    for (index, row) in current_rows(&document).into_iter().enumerate() {
        let id = row.value().attr("id").map(str::trim).unwrap_or_default();
        if id.is_empty() {
            tracing::debug!(row = index, "Dropping listing row without post id");
            continue;
        }

        if !seen.insert(id.to_string()) {
            tracing::warn!(post_id = id, "Dropping repeated post id on listing page");
            continue;
        }

        match parse_row(row, id, base_url) {
            Some(post) => posts.push(post),
            None => tracing::warn!(post_id = id, "Listing row has no title block, dropping"),
        }
    }

    posts
}

/// Returns the item rows that belong to the current listing
fn current_rows(document: &Html) -> Vec<ElementRef<'_>> {
    let Ok(separator_selector) = Selector::parse("tbody#separatorline") else {
        return Vec::new();
    };

    if let Some(separator) = document.select(&separator_selector).next() {
        return separator
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "tbody")
            .collect();
    }

    match Selector::parse("tbody") {
        Ok(tbody_selector) => document.select(&tbody_selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn parse_row(row: ElementRef<'_>, id: &str, base_url: &Url) -> Option<PostSummary> {
    let th = nth_child(row, "tr", 1).and_then(|tr| nth_child(tr, "th", 1))?;
    let block = nth_child(th, "div", 2)?;

    let category = nth_child(block, "a", 1)
        .and_then(|a| nth_child(a, "span", 1))
        .map(collapse_text)
        .unwrap_or_default();

    let title_link = if category.is_empty() {
        nth_child(block, "a", 1)
    } else {
        nth_child(block, "a", 2)
    };

    let title = title_link.map(collapse_text).unwrap_or_default();
    let detail_url = detail_url(row, title_link, base_url);

    let meta = nth_child(block, "div", 1);
    let author = meta
        .and_then(|div| nth_child(div, "span", 1))
        .and_then(|span| nth_child(span, "a", 1))
        .map(collapse_text)
        .unwrap_or_default();
    let raw_created_at = meta
        .and_then(|div| nth_child(div, "span", 3))
        .map(date_text)
        .unwrap_or_default();
    let reply_count = meta
        .and_then(|div| nth_child(div, "a", 1))
        .map(|a| parse_int(Some(&collapse_text(a))))
        .unwrap_or(0);
    let view_count = meta
        .and_then(|div| nth_child(div, "a", 2))
        .map(|a| parse_int(Some(&collapse_text(a))))
        .unwrap_or(0);

    let alts: Vec<&str> = children(block, "img")
        .filter_map(|img| img.value().attr("alt"))
        .map(str::trim)
        .collect();
    let status_label = alts
        .iter()
        .find(|alt| **alt != ATTACHMENT_MARKER && !alt.is_empty())
        .map(|alt| alt.to_string())
        .unwrap_or_default();
    let has_attachment = alts.contains(&ATTACHMENT_MARKER);

    Some(PostSummary {
        id: id.to_string(),
        title,
        author,
        category,
        status_label,
        has_attachment,
        raw_created_at,
        view_count,
        reply_count,
        detail_url,
    })
}

/// Picks the post permalink for a row
///
/// The title link is used when it points at a thread; otherwise any thread
/// link in the row wins, and finally the title link as-is.
fn detail_url(row: ElementRef<'_>, title_link: Option<ElementRef<'_>>, base_url: &Url) -> String {
    let title_href = title_link
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty());

    let href = match title_href {
        Some(href) if is_thread_link(href) => Some(href),
        _ => Selector::parse("a[href]")
            .ok()
            .and_then(|selector| {
                row.select(&selector)
                    .filter_map(|a| a.value().attr("href"))
                    .map(str::trim)
                    .find(|href| is_thread_link(href))
            })
            .or(title_href),
    };

    href.and_then(|href| base_url.join(href).ok())
        .map(|url| url.to_string())
        .unwrap_or_default()
}

fn is_thread_link(href: &str) -> bool {
    href.contains("thread-") || href.contains("viewthread.php")
}

/// Raw date text, preferring an inner element's `title` attribute
///
/// Discuz shows recent dates as "3 天前" and keeps the absolute date in the
/// `title` of a nested span.
fn date_text(span: ElementRef<'_>) -> String {
    let titled = span
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| el.value().attr("title"))
        .map(str::trim)
        .find(|title| !title.is_empty());

    match titled {
        Some(title) => title.to_string(),
        None => collapse_text(span),
    }
}

/// Element children of `parent` with the given tag name
fn children<'a>(parent: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |el| el.value().name() == name)
}

/// The `n`th (1-based) element child with the given tag name
fn nth_child<'a>(parent: ElementRef<'a>, name: &'a str, n: usize) -> Option<ElementRef<'a>> {
    children(parent, name).nth(n.checked_sub(1)?)
}

/// All descendant text joined with single spaces
fn collapse_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://bbs.example.com/").unwrap()
    }

    fn row(id: &str, category: Option<&str>, title: &str, date: &str, extra_imgs: &str) -> String {
        let category_link = category
            .map(|c| format!(r#"<a href="forum.php?typeid=1"><span>{c}</span></a>"#))
            .unwrap_or_default();
        format!(
            r#"<tbody id="{id}"><tr><th>
                <div class="icn"></div>
                <div>
                    {category_link}
                    <a href="thread-{id}-1-1.html" class="s xst">{title}</a>
                    {extra_imgs}
                    <div>
                        <span><a href="space-uid-1.html">alice</a></span>
                        <span>|</span>
                        <span>{date}</span>
                        <a href="thread-{id}-1-1.html">1,234 回复</a>
                        <a>56,789 次</a>
                    </div>
                </div>
            </th></tr></tbody>"#
        )
    }

    fn page(rows: &[String], with_separator: bool) -> String {
        let mut html = String::from("<html><body><table>");
        if with_separator {
            html.push_str(&row("stickthread_1", None, "置顶公告", "2020-1-1", ""));
            html.push_str(r#"<tbody id="separatorline"><tr><td>版块主题</td></tr></tbody>"#);
        }
        for r in rows {
            html.push_str(r);
        }
        html.push_str("</table></body></html>");
        html
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(Some("1,234 次")), 1234);
        assert_eq!(parse_int(Some("")), 0);
        assert_eq!(parse_int(None), 0);
        assert_eq!(parse_int(Some("回复 17")), 17);
        assert_eq!(parse_int(Some("无")), 0);
        assert_eq!(parse_int(Some("99999999999999999999999")), 0);
    }

    #[test]
    fn test_rows_after_separator_only() {
        let html = page(
            &[
                row("normalthread_10", None, "第一帖", "2025-12-7 08:53", ""),
                row("normalthread_11", None, "第二帖", "2025-12-7 09:00", ""),
            ],
            true,
        );
        let posts = parse_listing(&html, &base());
        let ids: Vec<_> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["normalthread_10", "normalthread_11"]);
    }

    #[test]
    fn test_all_rows_without_separator() {
        let html = page(
            &[
                row("normalthread_10", None, "第一帖", "2025-12-7", ""),
                row("normalthread_11", None, "第二帖", "2025-12-7", ""),
            ],
            false,
        );
        assert_eq!(parse_listing(&html, &base()).len(), 2);
    }

    #[test]
    fn test_fields_without_category() {
        let html = page(
            &[row("normalthread_10", None, "开机蓝屏", "2025-12-7 08:53", "")],
            false,
        );
        let post = &parse_listing(&html, &base())[0];

        assert_eq!(post.category, "");
        assert_eq!(post.title, "开机蓝屏");
        assert_eq!(post.author, "alice");
        assert_eq!(post.raw_created_at, "2025-12-7 08:53");
        assert_eq!(post.reply_count, 1234);
        assert_eq!(post.view_count, 56789);
        assert_eq!(
            post.detail_url,
            "https://bbs.example.com/thread-normalthread_10-1-1.html"
        );
        assert!(!post.has_attachment);
        assert_eq!(post.status_label, "");
    }

    #[test]
    fn test_category_shifts_title_link() {
        let html = page(
            &[row("normalthread_10", Some("求助"), "开机蓝屏", "2025-12-7", "")],
            false,
        );
        let post = &parse_listing(&html, &base())[0];
        assert_eq!(post.category, "求助");
        assert_eq!(post.title, "开机蓝屏");
    }

    #[test]
    fn test_status_and_attachment_from_icons() {
        let imgs = r#"<img src="a.gif" alt="attach_img"><img src="b.gif" alt="已解决">"#;
        let html = page(&[row("normalthread_10", None, "t", "2025-12-7", imgs)], false);
        let post = &parse_listing(&html, &base())[0];
        assert!(post.has_attachment);
        assert_eq!(post.status_label, "已解决");
    }

    #[test]
    fn test_date_title_attribute_preferred() {
        let date = r#"<span title="2025-12-7 08:53">3 天前</span>"#;
        let html = page(&[row("normalthread_10", None, "t", date, "")], false);
        assert_eq!(
            parse_listing(&html, &base())[0].raw_created_at,
            "2025-12-7 08:53"
        );
    }

    #[test]
    fn test_row_without_id_is_dropped() {
        let mut unnamed = row("x", None, "无名", "2025-12-7", "");
        unnamed = unnamed.replacen(r#"id="x""#, "", 1);
        let html = page(
            &[unnamed, row("normalthread_11", None, "有名", "2025-12-7", "")],
            false,
        );
        let posts = parse_listing(&html, &base());
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "normalthread_11");
    }

    #[test]
    fn test_repeated_id_kept_once() {
        let html = page(
            &[
                row("normalthread_10", None, "一", "2025-12-7", ""),
                row("normalthread_10", None, "一", "2025-12-7", ""),
            ],
            false,
        );
        assert_eq!(parse_listing(&html, &base()).len(), 1);
    }

    #[test]
    fn test_garbage_input_yields_nothing() {
        assert!(parse_listing("<html><body><p>维护中</p></body></html>", &base()).is_empty());
        assert!(parse_listing("", &base()).is_empty());
    }
}
