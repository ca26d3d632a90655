//! DAILY PICTURE CRAWLER
//! Walks the listing backwards from the newest page, keeps yesterday's JPEGs
//! under 1MB and stores them locally or in a GitHub repository.

mod error;
mod macros;
#[cfg(test)]
mod testing;

pub mod config;
pub mod delay;
pub mod download;
pub mod driver;
pub mod notify;
pub mod page_id;
pub mod parse;
pub mod process;
pub mod remote;
pub mod request;
pub mod session;
pub mod store;
pub mod window;

pub use error::{Error, Result};
