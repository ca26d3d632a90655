use chrono::Utc;

use crate::window::TargetWindow;

/// State of one crawl run: the day being harvested and the running image counter.
#[derive(Debug, Clone)]
pub struct CrawlSession {
    pub window: TargetWindow,
    counter: u64,
}

impl CrawlSession {
    pub fn new(window: TargetWindow) -> Self {
        Self { window, counter: 0 }
    }

    /// Names handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter
    }

    /// `<unix-timestamp>_<counter>.jpg` for the current second.
    pub fn next_artifact_name(&mut self) -> String {
        self.artifact_name_at(Utc::now().timestamp())
    }

    /// The counter only ever grows, so two names in the same second still differ.
    pub fn artifact_name_at(&mut self, unix_ts: i64) -> String {
        let name = format!("{unix_ts}_{}.jpg", self.counter);
        self.counter += 1;
        name
    }
}
