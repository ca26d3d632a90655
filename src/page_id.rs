//! Listing pages are addressed by `base64("YYYYMMDD-<page>")` with the padding stripped.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::{Error, Result};

/// Standard alphabet, no padding on encode, padding optional on decode.
/// Image hash fields on the listing pages use the same encoding.
pub(crate) const PAGE_ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A single listing page: the listing date plus its page number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub date: String,
    pub page: u32,
}

impl PageRef {
    pub fn new(date: impl Into<String>, page: u32) -> Self {
        Self {
            date: date.into(),
            page,
        }
    }

    /// The opaque identifier used in the page url.
    pub fn id(&self) -> String {
        encode(&self.date, self.page)
    }

    /// Full page url under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.id())
    }
}

pub fn encode(date: &str, page: u32) -> String {
    PAGE_ID_ENGINE.encode(format!("{date}-{page}"))
}

/// Reverses [`encode`]. Fails unless the token decodes to `<8 digits>-<page ≥ 1>`.
pub fn decode(token: &str) -> Result<PageRef> {
    let raw = String::from_utf8(PAGE_ID_ENGINE.decode(token.trim())?)?;
    let invalid = || Error::InvalidPageId(raw.clone());

    let (date, page) = raw.split_once('-').ok_or_else(invalid)?;
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let page = page
        .parse::<u32>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(invalid)?;

    Ok(PageRef::new(date, page))
}

/// Pulls the identifier out of a navigation href like `//jandan.net/pic/MjAy...#comments`.
pub fn token_from_href(href: &str) -> Option<&str> {
    let path = href.split(['#', '?']).next()?;
    let token = path.trim_end_matches('/').rsplit('/').next()?;
    (!token.is_empty()).then_some(token)
}
