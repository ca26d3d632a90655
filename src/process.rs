use async_trait::async_trait;
use chrono::Local;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{Config, LayoutKind, StorageConfig};
use crate::delay::{DelayPolicy, RandomDelay};
use crate::download::{fetch_jpeg, Download};
use crate::driver::{drive, CrawlPlan, CrawlReport, Harvester};
use crate::notify::{QuotaMonitor, SmtpMailer};
use crate::parse::Post;
use crate::remote::{GitHubClient, RemoteStore};
use crate::request::{discover_newest_page, HttpClient, HttpPageSource};
use crate::session::CrawlSession;
use crate::store::{ArtifactStore, FolderLayout, LocalStore};
use crate::window::{self, TargetWindow};
use crate::{info_time, Result};

/// Downloads the images of in-window posts and hands them to the store.
pub struct ImageHarvester<'a, D: ?Sized> {
    http: HttpClient,
    session: CrawlSession,
    store: Box<dyn ArtifactStore>,
    delay: &'a D,
}

impl<'a, D: DelayPolicy + ?Sized> ImageHarvester<'a, D> {
    pub fn new(
        http: HttpClient,
        session: CrawlSession,
        store: Box<dyn ArtifactStore>,
        delay: &'a D,
    ) -> Self {
        Self {
            http,
            session,
            store,
            delay,
        }
    }
}

#[async_trait]
impl<'a, D: DelayPolicy + ?Sized> Harvester for ImageHarvester<'a, D> {
    async fn harvest(&mut self, page: u32, post: &Post) -> usize {
        let mut accepted = 0;
        for url in &post.images {
            let bytes = match fetch_jpeg(&self.http, url).await {
                Ok(Download::Accepted(bytes)) => bytes,
                Ok(Download::Rejected(_)) => continue,
                Err(e) => {
                    warn!(page, %url, error = %e, "download failed");
                    continue;
                }
            };

            let name = self.session.next_artifact_name();
            match self.store.save(&name, &bytes).await {
                Ok(artifact) => {
                    accepted += 1;
                    info!(
                        page,
                        location = %artifact.location,
                        kb = artifact.bytes as f64 / 1024.0,
                        "saved image"
                    );
                    sleep(self.delay.after_image()).await;
                }
                Err(e) => warn!(page, %url, %name, error = %e, "couldn't store image"),
            }
        }
        accepted
    }
}

type GitHubMonitor = QuotaMonitor<GitHubClient, SmtpMailer>;

/// Builds the configured store, plus the quota monitor when uploading to GitHub.
fn open_store(
    storage: &StorageConfig,
    date_key: &str,
) -> Result<(Box<dyn ArtifactStore>, Option<GitHubMonitor>)> {
    match storage {
        StorageConfig::Local { root, layout } => {
            let layout = match layout {
                LayoutKind::Dated => FolderLayout::Dated(date_key.to_string()),
                LayoutKind::Sequential => FolderLayout::Sequential,
            };
            let store: Box<dyn ArtifactStore> = Box::new(LocalStore::new(root.clone(), layout));
            Ok((store, None))
        }
        StorageConfig::GitHub {
            repo,
            path_prefix,
            mail,
        } => {
            let github = GitHubClient::new(repo.clone())?;
            let mailer = SmtpMailer::new(mail.clone())?;
            let repo_name = format!("{}/{}", repo.owner, repo.repo);
            let store: Box<dyn ArtifactStore> =
                Box::new(RemoteStore::new(github.clone(), path_prefix, date_key));
            Ok((store, Some(QuotaMonitor::new(github, mailer, repo_name))))
        }
    }
}

/// Runs one full crawl of yesterday's posts.
pub async fn process_site(config: Config) -> Result<CrawlReport> {
    let start_time = Local::now();
    let target = TargetWindow::yesterday(window::now());
    info_time!(
        "Started crawling {} for {} (window {} .. {})",
        config.base_url,
        target.day,
        target.start,
        target.end
    );

    let http = HttpClient::new(&config.referer)?;
    let (store, monitor) = open_store(&config.storage, &target.date_key())?;

    if let Some(monitor) = &monitor {
        monitor.check("before run").await;
    }

    let newest = match discover_newest_page(&http, &config.base_url).await {
        Ok(newest) => newest,
        Err(e) => {
            error!(error = %e, "couldn't find the page range, stopping");
            return Err(e);
        }
    };
    info!(date = %newest.date, page = newest.page, id = %newest.id(), "newest page");

    let plan = CrawlPlan {
        newest_page: newest.page,
        max_pages: config.max_pages,
        max_consecutive_failures: config.max_failures,
    };
    let source = HttpPageSource::new(http.clone(), config.base_url.clone(), newest.date);
    let delay = RandomDelay;
    let mut harvester = ImageHarvester::new(http, CrawlSession::new(target), store, &delay);

    let report = drive(plan, &target, &source, &mut harvester, &delay, window::now).await;

    if let Some(monitor) = &monitor {
        monitor.check("after run").await;
    }

    info_time!(
        start_time,
        "Finished crawling: {} pages visited, {} harvested, {} of {} downloaded images saved, ended {:?}",
        report.visited.len(),
        report.harvested.len(),
        report.accepted,
        harvester.session.issued(),
        report.final_state
    );
    Ok(report)
}
