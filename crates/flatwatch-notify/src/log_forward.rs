use std::fmt::{self, Write as _};
use std::future::Future;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::{ChannelError, DiscordChannel};

/// Mirrors `ERROR` events into an unbounded queue drained by [`forward_errors`].
///
/// The layer itself never blocks or performs I/O, so it is safe on any thread that logs.
#[derive(Debug, Clone)]
pub struct ErrorForwardLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl ErrorForwardLayer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<S> Layer<S> for ErrorForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR {
            return;
        }

        let mut visitor = EventText::default();
        event.record(&mut visitor);
        // receiver gone means forwarding stopped at shutdown
        let _ = self.tx.send(visitor.render(metadata.target()));
    }
}

#[derive(Default)]
struct EventText {
    message: String,
    fields: String,
}

impl EventText {
    fn render(self, target: &str) -> String {
        let mut text = format!("**ERROR** `{target}`: {}", self.message);
        if !self.fields.is_empty() {
            text.push_str("\n```\n");
            text.push_str(self.fields.trim_end());
            text.push_str("\n```");
        }
        text
    }
}

impl Visit for EventText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = writeln!(self.fields, "{} = {value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = writeln!(self.fields, "{} = {value:?}", field.name());
        }
    }
}

/// Post forwarded error events to the developer channel.
///
/// Runs until every sender is dropped or `flush` resolves. After `flush`, events already
/// queued are still posted before returning.
pub async fn forward_errors<F>(rx: mpsc::UnboundedReceiver<String>, channel: DiscordChannel, flush: F)
where
    F: Future<Output = ()>,
{
    let channel = &channel;
    relay(rx, flush, move |text| async move { channel.post_text(&text).await }).await;
}

async fn relay<F, P, Fut>(mut rx: mpsc::UnboundedReceiver<String>, flush: F, mut post: P)
where
    F: Future<Output = ()>,
    P: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), ChannelError>>,
{
    tokio::pin!(flush);
    loop {
        tokio::select! {
            text = rx.recv() => match text {
                Some(text) => report(post(text).await),
                None => return,
            },
            _ = &mut flush => break,
        }
    }
    while let Ok(text) = rx.try_recv() {
        report(post(text).await);
    }
}

fn report(result: Result<(), ChannelError>) {
    if let Err(err) = result {
        warn!(error = %err, "could not forward error log to the developer channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn only_error_events_are_forwarded() {
        let (layer, mut rx) = ErrorForwardLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("cycle finished");
            tracing::warn!(source = "BRAVIS", "slow source");
            tracing::error!(source = "REALCITY", attempts = 3, "source failed");
        });

        let forwarded = rx.try_recv().expect("one forwarded event");
        assert!(forwarded.starts_with("**ERROR**"));
        assert!(forwarded.contains("source failed"));
        assert!(forwarded.contains("source = REALCITY"));
        assert!(forwarded.contains("attempts = 3"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_posts_queued_events_and_returns() {
        let (layer, rx) = ErrorForwardLayer::new();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("first failure");
            tracing::error!("scheduler stopped");
        });

        let posted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&posted);
        // `layer` still holds a sender, so only the flush can end the relay
        relay(rx, async {}, move |text| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(text);
                Ok(())
            }
        })
        .await;

        let posted = posted.lock().unwrap().clone();
        assert_eq!(posted.len(), 2);
        assert!(posted[1].contains("scheduler stopped"));
        drop(layer);
    }

    #[tokio::test]
    async fn closed_queue_ends_the_relay() {
        let (layer, rx) = ErrorForwardLayer::new();
        drop(layer);
        relay(rx, std::future::pending(), |_| async { Ok(()) }).await;
    }

    #[tokio::test]
    async fn failed_posts_do_not_stop_forwarding() {
        let (layer, rx) = ErrorForwardLayer::new();
        layer.tx.send("one".to_string()).unwrap();
        layer.tx.send("two".to_string()).unwrap();
        drop(layer);

        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        relay(rx, std::future::pending(), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock().unwrap() += 1;
                Err(ChannelError::Retryable("discord answered 502".into()))
            }
        })
        .await;
        assert_eq!(*attempts.lock().unwrap(), 2);
    }

    #[test]
    fn dropped_receiver_does_not_break_logging() {
        let (layer, rx) = ErrorForwardLayer::new();
        drop(rx);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("still logged");
        });
    }
}
