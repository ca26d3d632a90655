use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;

use crate::notify::SmtpSettings;
use crate::remote::GitHubRepo;
use crate::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://jandan.net/pic";
const DEFAULT_OUTPUT_DIR: &str = "pics";
const DEFAULT_SMTP_HOST: &str = "smtp.qq.com";
const DEFAULT_PATH_PREFIX: &str = "images";
const DEFAULT_MAX_PAGES: u32 = 60;
const DEFAULT_MAX_FAILURES: u32 = 5;

/// Crawler configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub referer: String,
    pub storage: StorageConfig,
    pub max_pages: u32,
    pub max_failures: u32,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
        layout: LayoutKind,
    },
    GitHub {
        repo: GitHubRepo,
        path_prefix: String,
        mail: SmtpSettings,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Dated,
    Sequential,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| Error::Config(format!("{key} must be set")));
        let number = |key: &str, default: u32| -> Result<u32> {
            match get(key) {
                Some(v) => v
                    .parse()
                    .map_err(|_| Error::Config(format!("{key} must be a valid number"))),
                None => Ok(default),
            }
        };

        let base_url = get("CRAWLER_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let referer = match get("CRAWLER_REFERER") {
            Some(r) => r,
            None => origin_of(&base_url)?,
        };

        let storage = match get("CRAWLER_STORAGE").as_deref().unwrap_or("local") {
            "local" => StorageConfig::Local {
                root: get("CRAWLER_OUTPUT_DIR")
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())
                    .into(),
                layout: match get("CRAWLER_FOLDER_LAYOUT").as_deref().unwrap_or("dated") {
                    "dated" => LayoutKind::Dated,
                    "sequential" => LayoutKind::Sequential,
                    other => {
                        return Err(Error::Config(format!(
                            "CRAWLER_FOLDER_LAYOUT must be dated or sequential, got {other}"
                        )))
                    }
                },
            },
            "github" => {
                let username = require("MAIL_USERNAME")?;
                let recipients = get("MAIL_RECIPIENTS")
                    .map(|r| {
                        r.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| vec![username.clone()]);
                StorageConfig::GitHub {
                    repo: GitHubRepo {
                        token: require("GITHUB_TOKEN")?,
                        owner: require("GITHUB_OWNER")?,
                        repo: require("GITHUB_REPO")?,
                        branch: get("GITHUB_BRANCH"),
                    },
                    path_prefix: get("GITHUB_PATH_PREFIX")
                        .unwrap_or_else(|| DEFAULT_PATH_PREFIX.to_string()),
                    mail: SmtpSettings {
                        host: get("MAIL_SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                        password: require("MAIL_PASSWORD")?,
                        username,
                        recipients,
                    },
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "CRAWLER_STORAGE must be local or github, got {other}"
                )))
            }
        };

        Ok(Self {
            base_url,
            referer,
            storage,
            max_pages: number("CRAWLER_MAX_PAGES", DEFAULT_MAX_PAGES)?,
            max_failures: number("CRAWLER_MAX_FAILURES", DEFAULT_MAX_FAILURES)?,
        })
    }
}

/// `https://jandan.net/pic` -> `https://jandan.net/`
fn origin_of(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Config(format!("CRAWLER_BASE_URL is not a valid url: {e}")))?;
    Ok(format!("{}/", parsed.origin().ascii_serialization()))
}
