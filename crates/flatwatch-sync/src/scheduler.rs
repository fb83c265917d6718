use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use flatwatch_adapters::AdapterRegistry;
use flatwatch_core::Listing;
use flatwatch_notify::{listing_embed, message_batches, status_line, ChannelError, Embed, NotificationChannel};
use flatwatch_storage::{HttpFetcher, SeenStore};
use serde::Serialize;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::{Deduplicator, Fingerprinter, ImageFingerprinter};
use crate::fetch::fetch_all;
use crate::filter::PriceFilter;
use crate::retry::{retry_until_success, RetryPolicy};

/// Source of wall-clock time; the local hour decides the refresh cadence.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn local_hour(&self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub daytime: Duration,
    pub nighttime: Duration,
}

impl RefreshIntervals {
    /// Daytime is the local hour range 06:00 to 21:59.
    pub fn for_hour(&self, hour: u32) -> Duration {
        if (6..22).contains(&hour) {
            self.daytime
        } else {
            self.nighttime
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub intervals: RefreshIntervals,
    pub batch_size: usize,
    pub batch_pacing: Duration,
    pub retry: RetryPolicy,
    pub price_filter: PriceFilter,
    pub dedup_threshold: u32,
    pub source_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            intervals: RefreshIntervals {
                daytime: Duration::from_secs(30 * 60),
                nighttime: Duration::from_secs(90 * 60),
            },
            batch_size: 10,
            batch_pacing: Duration::from_millis(1_500),
            retry: RetryPolicy::default(),
            price_filter: PriceFilter::default(),
            dedup_threshold: 5,
            source_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub current_interval: Duration,
    /// Set until the first cycle completes; that cycle records listings without sending.
    pub is_first_cycle: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub all: usize,
    pub new: usize,
    pub filtered: usize,
    pub deduplicated: usize,
    pub batches_sent: usize,
    pub interval_changed: bool,
}

/// Listings gathered without touching the seen store or the channel.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub all: usize,
    pub new: usize,
    pub filtered: usize,
    pub listings: Vec<Listing>,
}

pub struct DeliveryScheduler<S, C> {
    state: SchedulerState,
    settings: SchedulerSettings,
    adapters: AdapterRegistry,
    http: Arc<HttpFetcher>,
    store: S,
    channel: C,
    deduplicator: Deduplicator,
    clock: Arc<dyn Clock>,
}

impl<S, C> DeliveryScheduler<S, C>
where
    S: SeenStore,
    C: NotificationChannel,
{
    pub fn new(
        settings: SchedulerSettings,
        adapters: AdapterRegistry,
        http: Arc<HttpFetcher>,
        store: S,
        channel: C,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let deduplicator = Deduplicator::new(Arc::new(ImageFingerprinter::new(Arc::clone(&http))));
        Self {
            state: SchedulerState {
                current_interval: settings.intervals.for_hour(clock.local_hour()),
                is_first_cycle: true,
            },
            settings,
            adapters,
            http,
            store,
            channel,
            deduplicator,
            clock,
        }
    }

    /// A warm start (non-empty seen store) should deliver from the very first cycle.
    pub fn with_first_cycle(mut self, is_first_cycle: bool) -> Self {
        self.state.is_first_cycle = is_first_cycle;
        self
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.deduplicator = Deduplicator::new(fingerprinter);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.state.current_interval = self.settings.intervals.for_hour(clock.local_hour());
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Drive cycles until `shutdown` resolves or a cycle fails.
    ///
    /// The first cycle starts immediately. Ticks missed while a cycle runs collapse into
    /// one, so cycles never overlap.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(sources = ?self.adapters.names(), "available sources");
        info!(
            minutes = self.state.current_interval.as_secs() / 60,
            "fetching latest listings periodically"
        );

        let mut ticker = build_ticker(self.state.current_interval, Instant::now());
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping scheduler");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                _ = &mut shutdown => {
                    warn!("shutdown requested while a cycle was running, abandoning it");
                    return Ok(());
                }
                report = self.run_cycle() => report?,
            };

            if report.interval_changed {
                let period = self.state.current_interval;
                ticker = ticker_after(period);
            }
        }
    }

    /// One full fetch, filter, deduplicate and deliver pass.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);
        self.cycle(cycle_id).instrument(span).await
    }

    async fn cycle(&mut self, cycle_id: Uuid) -> Result<CycleReport> {
        let started_at = self.clock.now();
        let (all, new) = gather(
            &self.adapters,
            Arc::clone(&self.http),
            self.settings.source_timeout,
            &self.store,
        )
        .await;
        self.store
            .append_many(&new)
            .await
            .context("recording new listings in the seen store")?;

        let new_count = new.len();
        let filtered = self.settings.price_filter.filter(new);
        let filtered_count = filtered.len();
        let deduplicated = self
            .deduplicator
            .deduplicate(filtered, self.settings.dedup_threshold)
            .await;

        info!(
            all,
            new = new_count,
            filtered = filtered_count,
            deduplicated = deduplicated.len(),
            "listings processed"
        );

        let batches_sent = if self.state.is_first_cycle {
            self.state.is_first_cycle = false;
            info!("no previous listings, first fetch runs silently");
            0
        } else {
            self.deliver(&deduplicated).await?
        };

        let interval_changed = self.refresh_interval();

        let status = status_line(self.clock.now());
        let channel = &self.channel;
        retry_until_success(
            "channel status update",
            self.settings.retry,
            ChannelError::is_retryable,
            || channel.set_status(&status),
        )
        .await
        .context("updating channel status")?;

        Ok(CycleReport {
            cycle_id,
            started_at,
            finished_at: self.clock.now(),
            all,
            new: new_count,
            filtered: filtered_count,
            deduplicated: deduplicated.len(),
            batches_sent,
            interval_changed,
        })
    }

    async fn deliver(&self, listings: &[Listing]) -> Result<usize> {
        let now = self.clock.now();
        let embeds: Vec<Embed> = listings.iter().map(|listing| listing_embed(listing, now)).collect();
        let mut sent = 0;
        for embeds in message_batches(embeds, self.settings.batch_size) {
            if sent > 0 {
                sleep(self.settings.batch_pacing).await;
            }
            let channel = &self.channel;
            retry_until_success(
                "listing batch delivery",
                self.settings.retry,
                ChannelError::is_retryable,
                || channel.send(&embeds),
            )
            .await
            .with_context(|| format!("delivering batch of {} listings", embeds.len()))?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Returns true when the cadence changed.
    fn refresh_interval(&mut self) -> bool {
        let next = self.settings.intervals.for_hour(self.clock.local_hour());
        if next == self.state.current_interval {
            return false;
        }
        self.state.current_interval = next;
        info!(minutes = next.as_secs() / 60, "refresh interval changed");
        true
    }
}

/// Fetch every source and keep the listings `store` has not recorded yet.
async fn gather<S: SeenStore>(
    adapters: &AdapterRegistry,
    http: Arc<HttpFetcher>,
    source_timeout: Duration,
    store: &S,
) -> (usize, Vec<Listing>) {
    info!("fetching listings");
    let fetched = fetch_all(adapters.adapters(), http, source_timeout).await;
    let all = fetched.len();
    let new = fetched
        .into_iter()
        .filter(|listing| !store.contains(listing))
        .collect();
    (all, new)
}

/// Fetch, drop already-seen listings, filter and deduplicate. Nothing is recorded
/// and nothing is sent.
pub async fn preview<S: SeenStore>(
    settings: &SchedulerSettings,
    adapters: &AdapterRegistry,
    http: Arc<HttpFetcher>,
    store: &S,
    deduplicator: &Deduplicator,
) -> Preview {
    let (all, new) = gather(adapters, http, settings.source_timeout, store).await;
    let new_count = new.len();
    let filtered = settings.price_filter.filter(new);
    let filtered_count = filtered.len();
    let listings = deduplicator
        .deduplicate(filtered, settings.dedup_threshold)
        .await;
    Preview {
        all,
        new: new_count,
        filtered: filtered_count,
        listings,
    }
}

fn build_ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn ticker_after(period: Duration) -> Interval {
    build_ticker(period, Instant::now() + period)
}
