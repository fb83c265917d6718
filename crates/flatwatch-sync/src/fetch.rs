use std::sync::Arc;
use std::time::Duration;

use flatwatch_adapters::{AdapterError, SourceAdapter};
use flatwatch_core::Listing;
use flatwatch_storage::HttpFetcher;
use futures::future::join_all;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Listings of every succeeding source, in registration order.
    pub listings: Vec<Listing>,
    pub failures: Vec<SourceFailure>,
}

/// Fetch every source concurrently and concatenate what succeeded.
pub async fn fetch_all(
    adapters: &[Arc<dyn SourceAdapter>],
    http: Arc<HttpFetcher>,
    per_source_timeout: Duration,
) -> Vec<Listing> {
    fetch_all_detailed(adapters, http, per_source_timeout)
        .await
        .listings
}

/// One spawned task per adapter. A failing, timed-out or panicking source is logged
/// once and contributes nothing; its siblings always run to completion.
pub async fn fetch_all_detailed(
    adapters: &[Arc<dyn SourceAdapter>],
    http: Arc<HttpFetcher>,
    per_source_timeout: Duration,
) -> FetchReport {
    let handles = adapters
        .iter()
        .map(|adapter| {
            let adapter = Arc::clone(adapter);
            let http = Arc::clone(&http);
            tokio::spawn(async move {
                match tokio::time::timeout(per_source_timeout, adapter.fetch(&http)).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Timeout(per_source_timeout)),
                }
            })
        })
        .collect::<Vec<_>>();

    let mut report = FetchReport::default();
    for (adapter, outcome) in adapters.iter().zip(join_all(handles).await) {
        let failure = match outcome {
            Ok(Ok(listings)) => {
                info!(source = adapter.name(), count = listings.len(), "fetched listings");
                report.listings.extend(listings);
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(join_err) if join_err.is_panic() => format!("source task panicked: {join_err}"),
            Err(join_err) => format!("source task was cancelled: {join_err}"),
        };
        error!(source = adapter.name(), error = %failure, "source fetch failed");
        report.failures.push(SourceFailure {
            source: adapter.name().to_string(),
            error: failure,
        });
    }
    report
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use flatwatch_core::{DispositionSet, Price, SourceIdentity};
    use flatwatch_storage::HttpClientConfig;
    use std::fmt;
    use std::sync::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    pub(crate) enum Behavior {
        Listings(Vec<&'static str>),
        Fail,
        Panic,
        Hang,
    }

    /// Adapter double that never touches the network.
    pub(crate) struct FakeAdapter {
        identity: Arc<SourceIdentity>,
        behavior: Behavior,
    }

    impl FakeAdapter {
        pub(crate) fn new(name: &str, behavior: Behavior) -> Self {
            Self {
                identity: Arc::new(SourceIdentity::new(name, 0x123456, "https://logo")),
                behavior,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn identity(&self) -> &Arc<SourceIdentity> {
            &self.identity
        }

        fn category_tokens(&self, _dispositions: DispositionSet) -> Vec<String> {
            Vec::new()
        }

        async fn fetch(&self, _http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError> {
            match &self.behavior {
                Behavior::Listings(links) => Ok(links
                    .iter()
                    .map(|link| {
                        Listing::new(
                            Arc::clone(&self.identity),
                            *link,
                            "Pronájem 2+kk",
                            "Brno",
                            Price::Amount(12_000),
                            None,
                        )
                    })
                    .collect()),
                Behavior::Fail => Err(AdapterError::Parse("markup changed".into())),
                Behavior::Panic => panic!("adapter bug"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub(crate) fn http() -> Arc<HttpFetcher> {
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("http client"))
    }

    fn adapters(list: Vec<FakeAdapter>) -> Vec<Arc<dyn SourceAdapter>> {
        list.into_iter()
            .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
            .collect()
    }

    fn links(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.link.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn failing_sources_are_isolated() {
        let adapters = adapters(vec![
            FakeAdapter::new("first", Behavior::Listings(vec!["a1", "a2"])),
            FakeAdapter::new("broken", Behavior::Fail),
            FakeAdapter::new("buggy", Behavior::Panic),
            FakeAdapter::new("stuck", Behavior::Hang),
            FakeAdapter::new("last", Behavior::Listings(vec!["b1"])),
        ]);

        let report = fetch_all_detailed(&adapters, http(), Duration::from_secs(120)).await;

        assert_eq!(links(&report.listings), vec!["a1", "a2", "b1"]);
        let failed: Vec<_> = report.failures.iter().map(|f| f.source.as_str()).collect();
        assert_eq!(failed, vec!["broken", "buggy", "stuck"]);
        assert!(report.failures[1].error.contains("panicked"));
        assert!(report.failures[2].error.contains("did not finish"));
    }

    /// Collects the `source` field of every ERROR event.
    #[derive(Clone, Default)]
    struct ErrorCapture {
        sources: Arc<Mutex<Vec<String>>>,
    }

    impl ErrorCapture {
        fn sources(&self) -> Vec<String> {
            self.sources.lock().unwrap().clone()
        }
    }

    impl<S: Subscriber> Layer<S> for ErrorCapture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() != Level::ERROR {
                return;
            }
            let mut visitor = SourceField::default();
            event.record(&mut visitor);
            self.sources.lock().unwrap().push(visitor.0);
        }
    }

    #[derive(Default)]
    struct SourceField(String);

    impl Visit for SourceField {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "source" {
                self.0 = value.to_string();
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "source" {
                self.0 = format!("{value:?}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn each_failing_source_is_logged_once() {
        let capture = ErrorCapture::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(capture.clone()),
        );
        let adapters = adapters(vec![
            FakeAdapter::new("healthy", Behavior::Listings(vec!["a1"])),
            FakeAdapter::new("broken", Behavior::Fail),
            FakeAdapter::new("buggy", Behavior::Panic),
            FakeAdapter::new("stuck", Behavior::Hang),
        ]);

        fetch_all(&adapters, http(), Duration::from_secs(120)).await;

        assert_eq!(capture.sources(), vec!["broken", "buggy", "stuck"]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_sources_failing_yields_nothing() {
        let adapters = adapters(vec![
            FakeAdapter::new("broken", Behavior::Fail),
            FakeAdapter::new("buggy", Behavior::Panic),
        ]);
        assert!(fetch_all(&adapters, http(), Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test]
    async fn results_keep_registration_order() {
        let adapters = adapters(vec![
            FakeAdapter::new("one", Behavior::Listings(vec!["1a", "1b"])),
            FakeAdapter::new("two", Behavior::Listings(vec![])),
            FakeAdapter::new("three", Behavior::Listings(vec!["3a"])),
        ]);
        let listings = fetch_all(&adapters, http(), Duration::from_secs(5)).await;
        assert_eq!(links(&listings), vec!["1a", "1b", "3a"]);
    }
}
