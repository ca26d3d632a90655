use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("The selector you are trying to scrape for is invalid. Selector: {0}")]
    ParseInvalidSelector(String),
    #[error("Couldn't find a page range in the navigation links.")]
    NoPageRange,
    #[error("Invalid page identifier: {0}")]
    InvalidPageId(String),
    #[error("Invalid image url: {0}")]
    InvalidUrl(String),

    #[error("Base64 Error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Utf8 Error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Request to {url} failed with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Mail address Error: {0}")]
    MailAddress(#[from] lettre::address::AddressError),
    #[error("Mail message Error: {0}")]
    MailMessage(#[from] lettre::error::Error),
    #[error("Smtp Error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}
