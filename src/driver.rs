//! The backward page scan: skip pages newer than the target day, harvest the
//! target day, stop at the first older post.
//!
//! Pages are visited newest first, so page numbers only ever decrease.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::delay::DelayPolicy;
use crate::parse::{Listing, Post};
use crate::window::{Recency, TargetWindow};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    AtStart,
    PagingBackward,
    FoundTargetDay,
    Exhausted,
    Error,
}

/// Post counts of one page by [`Recency`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageObservation {
    pub newer: usize,
    pub in_window: usize,
    pub older: usize,
    pub unknown: usize,
}

impl PageObservation {
    pub fn record(&mut self, recency: Recency) {
        match recency {
            Recency::Newer => self.newer += 1,
            Recency::InWindow => self.in_window += 1,
            Recency::Older => self.older += 1,
            Recency::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub next: CrawlState,
    /// Harvest the in-window posts of this page.
    pub harvest: bool,
}

impl CrawlState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CrawlState::Exhausted | CrawlState::Error)
    }

    pub fn on_page(self, obs: &PageObservation) -> Step {
        if self.is_terminal() {
            return Step {
                next: self,
                harvest: false,
            };
        }
        let next = if obs.older > 0 {
            CrawlState::Exhausted
        } else if obs.in_window > 0 || self == CrawlState::FoundTargetDay {
            CrawlState::FoundTargetDay
        } else {
            CrawlState::PagingBackward
        };
        Step {
            next,
            harvest: obs.in_window > 0,
        }
    }

    pub fn on_failure(self, consecutive: u32, limit: u32) -> CrawlState {
        match self {
            s if s.is_terminal() => s,
            _ if consecutive >= limit => CrawlState::Error,
            CrawlState::AtStart => CrawlState::PagingBackward,
            s => s,
        }
    }

    /// No older page left, or the page ceiling was hit.
    pub fn on_range_end(self) -> CrawlState {
        match self {
            CrawlState::Error => CrawlState::Error,
            _ => CrawlState::Exhausted,
        }
    }
}

/// Supplies parsed listing pages by number.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, page: u32) -> Result<Listing>;
}

/// Handles one in-window post, returning how many images it accepted.
#[async_trait]
pub trait Harvester: Send {
    async fn harvest(&mut self, page: u32, post: &Post) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlPlan {
    pub newest_page: u32,
    /// Hard ceiling on pages requested.
    pub max_pages: u32,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub visited: Vec<u32>,
    pub harvested: Vec<u32>,
    pub accepted: usize,
    pub final_state: CrawlState,
}

/// Runs the page loop from `plan.newest_page` downwards until a terminal state.
pub async fn drive<S, H, D, C>(
    plan: CrawlPlan,
    window: &TargetWindow,
    source: &S,
    harvester: &mut H,
    delay: &D,
    clock: C,
) -> CrawlReport
where
    S: PageSource + ?Sized,
    H: Harvester + ?Sized,
    D: DelayPolicy + ?Sized,
    C: Fn() -> DateTime<FixedOffset> + Send + Sync,
{
    let mut report = CrawlReport {
        visited: Vec::new(),
        harvested: Vec::new(),
        accepted: 0,
        final_state: CrawlState::AtStart,
    };
    let mut state = CrawlState::AtStart;
    let mut page = plan.newest_page;
    let mut failures = 0;

    while !state.is_terminal() {
        if page == 0 || report.visited.len() >= plan.max_pages as usize {
            state = state.on_range_end();
            debug!(page, ?state, "page range ended");
            break;
        }
        report.visited.push(page);

        let listing = match source.fetch(page).await {
            Ok(listing) => listing,
            Err(e) => {
                failures += 1;
                state = state.on_failure(failures, plan.max_consecutive_failures);
                warn!(page, failures, error = %e, ?state, "page failed");
                if !state.is_terminal() {
                    sleep(delay.after_failure(failures)).await;
                }
                page -= 1;
                continue;
            }
        };
        failures = 0;

        let now = clock();
        let recencies: Vec<Recency> = listing
            .posts
            .iter()
            .map(|post| match &post.time_text {
                Some(text) => window.classify(text, now),
                None => Recency::Unknown,
            })
            .collect();
        let mut obs = PageObservation::default();
        recencies.iter().for_each(|r| obs.record(*r));

        let step = state.on_page(&obs);
        info!(page, ?obs, from = ?state, to = ?step.next, "page classified");

        if step.harvest {
            report.harvested.push(page);
            for (post, recency) in listing.posts.iter().zip(&recencies) {
                if *recency == Recency::InWindow {
                    report.accepted += harvester.harvest(page, post).await;
                }
            }
        }
        state = step.next;

        if !state.is_terminal() {
            sleep(delay.after_page()).await;
        }
        page -= 1;
    }

    report.final_state = state;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(newer: usize, in_window: usize, older: usize) -> PageObservation {
        PageObservation {
            newer,
            in_window,
            older,
            unknown: 0,
        }
    }

    #[test]
    fn pages_backward_over_newer_posts() {
        let step = CrawlState::AtStart.on_page(&obs(20, 0, 0));
        assert_eq!(step.next, CrawlState::PagingBackward);
        assert!(!step.harvest);
    }

    #[test]
    fn first_in_window_post_switches_to_harvesting() {
        let step = CrawlState::PagingBackward.on_page(&obs(10, 3, 0));
        assert_eq!(
            step,
            Step {
                next: CrawlState::FoundTargetDay,
                harvest: true
            }
        );
    }

    #[test]
    fn boundary_page_harvests_then_stops() {
        let step = CrawlState::FoundTargetDay.on_page(&obs(0, 4, 2));
        assert_eq!(
            step,
            Step {
                next: CrawlState::Exhausted,
                harvest: true
            }
        );
    }

    #[test]
    fn older_without_target_day_exhausts() {
        let step = CrawlState::PagingBackward.on_page(&obs(0, 0, 5));
        assert_eq!(step.next, CrawlState::Exhausted);
        assert!(!step.harvest);
    }

    #[test]
    fn unknown_only_page_keeps_state() {
        let empty = PageObservation {
            unknown: 3,
            ..Default::default()
        };
        assert_eq!(
            CrawlState::FoundTargetDay.on_page(&empty).next,
            CrawlState::FoundTargetDay
        );
        assert_eq!(
            CrawlState::AtStart.on_page(&empty).next,
            CrawlState::PagingBackward
        );
    }

    #[test]
    fn terminal_states_are_sticky() {
        for s in [CrawlState::Exhausted, CrawlState::Error] {
            assert_eq!(s.on_page(&obs(0, 5, 0)).next, s);
            assert_eq!(s.on_failure(1, 5), s);
        }
        assert_eq!(CrawlState::Error.on_range_end(), CrawlState::Error);
        assert_eq!(CrawlState::FoundTargetDay.on_range_end(), CrawlState::Exhausted);
    }

    #[test]
    fn failures_error_out_at_limit() {
        assert_eq!(CrawlState::AtStart.on_failure(1, 3), CrawlState::PagingBackward);
        assert_eq!(CrawlState::FoundTargetDay.on_failure(2, 3), CrawlState::FoundTargetDay);
        assert_eq!(CrawlState::FoundTargetDay.on_failure(3, 3), CrawlState::Error);
    }
}
