use std::sync::Arc;

use base64::Engine;
use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

use crate::page_id::{self, PageRef, PAGE_ID_ENGINE};
use crate::{Error, Result};

const POST_SELECTOR: &str = r#"li[id^="comment-"]"#;
const TIME_SELECTORS: [&str; 2] = ["span.time", ".author small"];
const IMAGE_LINK_SELECTOR: &str = "a.view_img_link[href]";
const IMAGE_HASH_SELECTOR: &str = "span.img-hash";
const NAV_LINK_SELECTOR: &str = r#"a[href*="/pic/"]"#;
const CURRENT_PAGE_SELECTOR: &str = "span.current-comment-page";

/// One parsed listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Post {
    pub id: Option<String>,
    pub time_text: Option<String>,
    /// Absolute https urls.
    pub images: Vec<String>,
}

/// Parses a listing page off the async runtime.
pub(crate) async fn parse_listing(html: Arc<String>) -> Result<Listing> {
    let listing = spawn_blocking(move || parse_listing_html(&html)).await??;
    Ok(listing)
}

/// Finds the newest page referenced by the landing page's navigation.
pub(crate) async fn parse_page_range(html: Arc<String>) -> Result<PageRef> {
    spawn_blocking(move || newest_page(&html)).await?
}

/// Extracts every post with its time text and image links.
pub fn parse_listing_html(html: &str) -> Result<Listing> {
    let doc = Html::parse_document(html);

    let post_selector = create_selector(POST_SELECTOR)?;
    let time_selectors = TIME_SELECTORS
        .iter()
        .map(|s| create_selector(s))
        .collect::<Result<Vec<_>>>()?;
    let link_selector = create_selector(IMAGE_LINK_SELECTOR)?;
    let hash_selector = create_selector(IMAGE_HASH_SELECTOR)?;

    // A listing page holds at most 25 posts.
    let mut posts = Vec::with_capacity(25);
    for post_li in doc.select(&post_selector) {
        let time_text = time_selectors
            .iter()
            .find_map(|sel| post_li.select(sel).next())
            .map(|el| collapse_text(&el))
            .filter(|t| !t.is_empty());

        let mut images = Vec::new();
        for a in post_li.select(&link_selector) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            if !has_jpeg_extension(href) {
                continue;
            }
            push_normalized(&mut images, href);
        }
        for span in post_li.select(&hash_selector) {
            let hash = collapse_text(&span);
            match decode_image_hash(&hash) {
                Ok(url) => push_normalized(&mut images, &url),
                Err(e) => warn!(%hash, error = %e, "skipping undecodable image hash"),
            }
        }

        posts.push(Post {
            id: post_li.value().attr("id").map(str::to_string),
            time_text,
            images,
        });
    }

    Ok(Listing { posts })
}

/// The newest page is the highest page number among the decodable navigation
/// links and the current-page marker. Fails when nothing decodes.
pub fn newest_page(html: &str) -> Result<PageRef> {
    let doc = Html::parse_document(html);
    let nav_selector = create_selector(NAV_LINK_SELECTOR)?;
    let current_selector = create_selector(CURRENT_PAGE_SELECTOR)?;

    let newest_linked = doc
        .select(&nav_selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(page_id::token_from_href)
        .filter_map(|token| page_id::decode(token).ok())
        .max_by_key(|page_ref| page_ref.page)
        .ok_or(Error::NoPageRange)?;

    let current = doc
        .select(&current_selector)
        .next()
        .map(|el| collapse_text(&el))
        .and_then(|t| t.trim_matches(['[', ']', ' ']).parse::<u32>().ok());
    debug!(?newest_linked, ?current, "navigation parsed");

    Ok(match current {
        Some(page) if page > newest_linked.page => PageRef::new(newest_linked.date, page),
        _ => newest_linked,
    })
}

/// Image hashes are base64 urls, sometimes behind a `data:...,` prefix.
pub fn decode_image_hash(hash: &str) -> Result<String> {
    let encoded = hash.rsplit_once(',').map_or(hash, |(_, rest)| rest).trim();
    let decoded = String::from_utf8(PAGE_ID_ENGINE.decode(encoded)?)?;
    Ok(decoded)
}

/// `//host/x.jpg` and `host/x.jpg` both become `https://host/x.jpg`.
pub fn normalize_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let absolute = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if let Some(rest) = raw.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        format!("https://{}", raw.trim_start_matches('/'))
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .filter(|url| url.host_str().is_some_and(|h| !h.is_empty()))
        .map(|url| url.to_string())
        .ok_or_else(|| Error::InvalidUrl(raw.to_string()))
}

/// Whether the url path (query and fragment ignored) ends in `.jpg`/`.jpeg`.
pub fn has_jpeg_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default().to_lowercase();
    path.ends_with(".jpg") || path.ends_with(".jpeg")
}

fn push_normalized(images: &mut Vec<String>, raw: &str) {
    match normalize_url(raw) {
        Ok(url) if !images.contains(&url) => images.push(url),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "skipping image link"),
    }
}

fn collapse_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseInvalidSelector(sel_str.into()))
}
