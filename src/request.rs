use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use tracing::debug;

use crate::driver::PageSource;
use crate::page_id::PageRef;
use crate::parse::{parse_listing, parse_page_range, Listing};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

/// A reqwest client that sends browser-like headers, rotating the user agent per request.
#[derive(Debug, Clone)]
pub struct HttpClient {
    // Client uses Arc so we can clone cheaply
    client: Client,
    referer: HeaderValue,
}

impl HttpClient {
    pub fn new(referer: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let referer = HeaderValue::from_str(referer)
            .map_err(|_| Error::Config(format!("invalid referer: {referer}")))?;
        Ok(Self { client, referer })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let agent = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
        headers.insert(USER_AGENT, HeaderValue::from_static(agent));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.8,en-US;q=0.5,en;q=0.3"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(REFERER, self.referer.clone());
        headers
    }

    pub async fn head(&self, url: &str) -> Result<Response> {
        Ok(self.client.head(url).headers(self.headers()).send().await?)
    }

    /// GET that turns a non-success status into [`Error::HttpStatus`].
    pub async fn get(&self, url: &str) -> Result<Response> {
        let res = self.client.get(url).headers(self.headers()).send().await?;
        if !res.status().is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: res.status(),
            });
        }
        Ok(res)
    }

    /// Requests a page and returns the HTML.
    pub async fn get_html(&self, url: &str) -> Result<String> {
        let html = self.get(url).await?.text().await?;
        Ok(html)
    }
}

/// Listing pages fetched over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    http: HttpClient,
    base_url: String,
    date: String,
}

impl HttpPageSource {
    pub fn new(http: HttpClient, base_url: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            date: date.into(),
        }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, page: u32) -> Result<Listing> {
        let url = PageRef::new(self.date.clone(), page).url(&self.base_url);
        debug!(page, %url, "requesting page");
        let html = self.http.get_html(&url).await?;
        parse_listing(Arc::new(html)).await
    }
}

/// Reads the landing page and works out the newest listing page.
pub async fn discover_newest_page(http: &HttpClient, base_url: &str) -> Result<PageRef> {
    let html = http.get_html(base_url).await?;
    parse_page_range(Arc::new(html)).await
}
