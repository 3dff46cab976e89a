//! Marketplace activity watcher.
//!
//! Polls an activity endpoint that has no cursor contract and reports only the
//! events not seen before. The only state carried between polls is a
//! [`Watermark`]: the newest `createOn` timestamp observed so far.
//!
//! Delivery is best-effort. If more than one page of activity happens between
//! two polls, the overflow is never seen.

pub mod okx;

pub use okx::{ActivityFeed, FeedError, OkxActivityFeed};

use chrono::{Local, TimeZone};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One marketplace activity record.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub ticker: String,
    pub type_name: String,
    pub amount: f64,
    pub unit_price_usd: f64,
    pub total_price_usd: f64,
    /// Epoch seconds, fractional.
    pub created_at: f64,
}

impl ActivityEvent {
    /// Local wall-clock rendering of `created_at`.
    pub fn formatted_time(&self) -> String {
        let millis = (self.created_at * 1000.0).round() as i64;
        match Local.timestamp_millis_opt(millis).single() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{:.3}", self.created_at),
        }
    }
}

impl std::fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.formatted_time(),
            self.ticker,
            self.type_name,
            self.amount,
            self.unit_price_usd,
            self.total_price_usd
        )
    }
}

/// Timestamp (epoch seconds) of the newest event already reported.
/// Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Watermark(f64);

impl Watermark {
    /// Accepts every event with a positive timestamp.
    pub const ORIGIN: Watermark = Watermark(0.0);

    pub fn new(secs: f64) -> Self {
        Watermark(secs)
    }

    pub fn now() -> Self {
        Watermark(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
    }

    pub fn secs(&self) -> f64 {
        self.0
    }

    /// Non-finite timestamps never move the watermark.
    fn max_with(self, ts: f64) -> Self {
        if ts.is_finite() && ts > self.0 {
            Watermark(ts)
        } else {
            self
        }
    }
}

/// Where the watermark starts when the watcher boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdStart {
    /// Report the whole first snapshot once.
    #[default]
    Replay,
    /// Suppress anything created before startup.
    Now,
}

impl ColdStart {
    pub fn initial_watermark(self) -> Watermark {
        match self {
            ColdStart::Replay => Watermark::ORIGIN,
            ColdStart::Now => Watermark::now(),
        }
    }
}

/// Pick the events of `snapshot` newer than `watermark`, preserving snapshot
/// order, and compute the advanced watermark.
///
/// Every event is compared against the pre-scan watermark; the advance is
/// computed over the whole snapshot and applied once at the end. A snapshot
/// holding only older events leaves the watermark where it was.
pub fn select_new(
    snapshot: &[ActivityEvent],
    watermark: Watermark,
) -> (Vec<ActivityEvent>, Watermark) {
    let mut fresh = Vec::new();
    let mut newest = watermark;

    for event in snapshot {
        if !event.created_at.is_finite() {
            warn!(ticker = %event.ticker, "skipping event with non-finite timestamp");
            continue;
        }
        if event.created_at > watermark.secs() {
            fresh.push(event.clone());
        }
        newest = newest.max_with(event.created_at);
    }

    (fresh, newest)
}

/// Polls one [`ActivityFeed`] on a fixed interval and emits unseen events.
pub struct FeedWatcher {
    feed: Arc<dyn ActivityFeed>,
    interval: Duration,
    watermark: Watermark,
    event_tx: mpsc::UnboundedSender<ActivityEvent>,
}

impl FeedWatcher {
    pub fn new(
        feed: Arc<dyn ActivityFeed>,
        interval: Duration,
        cold_start: ColdStart,
        event_tx: mpsc::UnboundedSender<ActivityEvent>,
    ) -> Self {
        Self {
            feed,
            interval,
            watermark: cold_start.initial_watermark(),
            event_tx,
        }
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Fetch one snapshot and return the unseen events, advancing the
    /// watermark. A failed fetch yields nothing and leaves the watermark alone.
    pub async fn poll_once(&mut self) -> Vec<ActivityEvent> {
        let snapshot = match self.feed.fetch_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "activity poll failed");
                return Vec::new();
            }
        };

        let (fresh, advanced) = select_new(&snapshot, self.watermark);
        debug!(
            snapshot = snapshot.len(),
            fresh = fresh.len(),
            watermark = advanced.secs(),
            "activity poll"
        );
        self.watermark = advanced;
        fresh
    }

    /// Poll, emit, sleep, forever. Returns only if the receiving side of the
    /// event channel is dropped.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            watermark = self.watermark.secs(),
            "activity watcher started"
        );

        loop {
            for event in self.poll_once().await {
                if self.event_tx.send(event).is_err() {
                    info!("activity channel closed, watcher stopping");
                    return;
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Start the watcher in a background task. Returns immediately.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn event(ticker: &str, created_at: f64) -> ActivityEvent {
        ActivityEvent {
            ticker: ticker.to_string(),
            type_name: "Sold".to_string(),
            amount: 1000.0,
            unit_price_usd: 0.01,
            total_price_usd: 10.0,
            created_at,
        }
    }

    /// Serves queued snapshots; `None` entries simulate a transport failure.
    struct ScriptedFeed {
        script: Mutex<VecDeque<Option<Vec<ActivityEvent>>>>,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Option<Vec<ActivityEvent>>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl ActivityFeed for ScriptedFeed {
        async fn fetch_snapshot(&self) -> Result<Vec<ActivityEvent>, FeedError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Some(snapshot)) => Ok(snapshot),
                Some(None) => Err(FeedError::ApiError {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
                None => Ok(Vec::new()),
            }
        }
    }

    #[test]
    fn test_select_new_filters_and_keeps_order() {
        let snapshot = vec![event("a", 300.0), event("b", 100.0), event("c", 250.0)];
        let (fresh, wm) = select_new(&snapshot, Watermark::new(200.0));

        let tickers: Vec<&str> = fresh.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["a", "c"]);
        assert_eq!(wm, Watermark::new(300.0));
    }

    #[test]
    fn test_newest_first_snapshot_does_not_skip_later_elements() {
        // Updating the threshold mid-scan would drop "b" and "c".
        let snapshot = vec![event("a", 500.0), event("b", 400.0), event("c", 400.0)];
        let (fresh, wm) = select_new(&snapshot, Watermark::new(300.0));
        assert_eq!(fresh.len(), 3);
        assert_eq!(wm.secs(), 500.0);
    }

    #[test]
    fn test_equal_timestamp_is_not_new() {
        let snapshot = vec![event("a", 200.0)];
        let (fresh, wm) = select_new(&snapshot, Watermark::new(200.0));
        assert!(fresh.is_empty());
        assert_eq!(wm.secs(), 200.0);
    }

    #[test]
    fn test_same_snapshot_twice_yields_nothing() {
        let snapshot = vec![event("a", 10.0), event("b", 30.0), event("c", 20.0)];
        let (first, wm) = select_new(&snapshot, Watermark::ORIGIN);
        assert_eq!(first.len(), 3);

        let (second, wm2) = select_new(&snapshot, wm);
        assert!(second.is_empty());
        assert_eq!(wm, wm2);
    }

    #[test]
    fn test_watermark_never_moves_backward() {
        let snapshots = vec![
            vec![event("a", 100.0)],
            vec![event("old", 50.0)],
            vec![],
            vec![event("b", 150.0), event("older", 10.0)],
            vec![event("a", 100.0)],
        ];

        let mut wm = Watermark::ORIGIN;
        let mut history = vec![wm];
        for snapshot in &snapshots {
            let (_, next) = select_new(snapshot, wm);
            wm = next;
            history.push(wm);
        }

        assert!(history.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(wm.secs(), 150.0);
    }

    #[test]
    fn test_non_finite_timestamp_does_not_poison_watermark() {
        let snapshot = vec![
            event("inf", f64::INFINITY),
            event("nan", f64::NAN),
            event("a", 100.0),
        ];
        let (fresh, wm) = select_new(&snapshot, Watermark::ORIGIN);
        let tickers: Vec<&str> = fresh.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["a"]);
        assert_eq!(wm.secs(), 100.0);

        let (later, wm) = select_new(&[event("b", 1701866996.0)], wm);
        assert_eq!(later.len(), 1);
        assert_eq!(wm.secs(), 1701866996.0);
    }

    #[test]
    fn test_cold_start_now_suppresses_history() {
        let wm = ColdStart::Now.initial_watermark();
        let (fresh, _) = select_new(&[event("history", 1701866996.0)], wm);
        assert!(fresh.is_empty());
        assert_eq!(ColdStart::Replay.initial_watermark(), Watermark::ORIGIN);
    }

    #[test]
    fn test_formatted_time_shape() {
        let s = event("Dovi", 1701866996.0).formatted_time();
        assert_eq!(s.len(), "2023-12-06 12:49:56".len());
        assert!(s.starts_with("2023-12-"));
    }

    #[tokio::test]
    async fn test_poll_once_dovi_scenario() {
        let snapshot = vec![event("Dovi", 1701866996000.0 / 1000.0)];
        let feed = ScriptedFeed::new(vec![Some(snapshot.clone()), Some(snapshot)]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = FeedWatcher::new(feed, Duration::from_secs(60), ColdStart::Replay, tx);

        let first = watcher.poll_once().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].ticker, "Dovi");
        assert_eq!(watcher.watermark().secs(), 1701866996.0);

        let second = watcher.poll_once().await;
        assert!(second.is_empty());
        assert_eq!(watcher.watermark().secs(), 1701866996.0);
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_watermark() {
        let feed = ScriptedFeed::new(vec![
            Some(vec![event("a", 100.0)]),
            None,
            Some(vec![event("a", 100.0), event("b", 120.0)]),
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = FeedWatcher::new(feed, Duration::from_secs(60), ColdStart::Replay, tx);

        assert_eq!(watcher.poll_once().await.len(), 1);
        assert!(watcher.poll_once().await.is_empty());
        assert_eq!(watcher.watermark().secs(), 100.0);

        let third = watcher.poll_once().await;
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].ticker, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_across_failures() {
        let feed = ScriptedFeed::new(vec![
            Some(vec![event("a", 100.0)]),
            None,
            Some(vec![event("b", 200.0), event("a", 100.0)]),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = FeedWatcher::new(feed, Duration::from_secs(60), ColdStart::Replay, tx).start();

        assert_eq!(rx.recv().await.unwrap().ticker, "a");
        assert_eq!(rx.recv().await.unwrap().ticker, "b");

        drop(rx);
        handle.abort();
    }
}
