//! Integration test verifying that pipeline operations emit their spans and
//! never record key material.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use keysign::{KeyCheckoutQueue, SignerApp, SignerConfig};
use keysign_queue::{MemoryQueue, QueueTransport};
use keysign_storage::MemoryBackend;
use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Default)]
struct Recorded {
    spans: Vec<String>,
    values: Vec<String>,
}

struct Values<'a>(&'a mut Vec<String>);

impl Visit for Values<'_> {
    fn record_debug(&mut self, _field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push(format!("{value:?}"));
    }
}

#[derive(Clone, Default)]
struct Collector {
    recorded: Arc<Mutex<Recorded>>,
}

impl<S> tracing_subscriber::Layer<S> for Collector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut recorded = self.recorded.lock().expect("lock poisoned");
        if let Some(span) = ctx.span(id) {
            recorded.spans.push(span.name().to_owned());
        }
        attrs.record(&mut Values(&mut recorded.values));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut recorded = self.recorded.lock().expect("lock poisoned");
        event.record(&mut Values(&mut recorded.values));
    }
}

fn install() -> (Arc<Mutex<Recorded>>, tracing::subscriber::DefaultGuard) {
    let collector = Collector::default();
    let recorded = Arc::clone(&collector.recorded);
    let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));
    (recorded, guard)
}

#[tokio::test]
async fn signing_run_emits_operation_spans() {
    let (recorded, _guard) = install();

    let config = SignerConfig::builder()
        .key_pool_size(2)
        .document_seed_count(0)
        .dispatch_concurrency(1)
        .build()
        .expect("config");
    let app = SignerApp::new(config, MemoryBackend::new(), MemoryQueue::new()).expect("app");
    app.startup().setup().await.expect("setup");
    app.documents().seed(30, true).await.expect("seed");
    app.orchestrator().run(10).await.expect("run");
    app.runner().drain(Duration::from_millis(20)).await.expect("drain");

    let private: Vec<String> =
        app.keys().keys().await.expect("keys").iter().map(|k| k.private.clone()).collect();

    let recorded = recorded.lock().expect("lock poisoned");
    for name in [
        "setup",
        "seed",
        "run",
        "reset",
        "publish",
        "drain",
        "handle_batch",
        "pop_within",
        "by_ids",
        "bulk_upsert",
        "batch_put",
    ] {
        assert!(
            recorded.spans.iter().any(|s| s == name),
            "missing span '{name}', recorded: {:?}",
            recorded.spans
        );
    }

    for secret in &private {
        assert!(
            !recorded.values.iter().any(|v| v.contains(secret.as_str())),
            "key material leaked into a log field"
        );
    }
}

#[tokio::test]
async fn undecodable_key_message_is_logged_with_its_id() {
    let (recorded, _guard) = install();

    let queue = MemoryQueue::new();
    queue.ensure_topic("keys.fifo").await.expect("topic");
    let id = queue.push("keys.fifo", "{not a key".to_owned()).await.expect("push");
    let checkout = KeyCheckoutQueue::new(queue, "keys.fifo", Duration::from_millis(20));

    assert!(checkout.pop().await.is_err());

    let recorded = recorded.lock().expect("lock poisoned");
    assert!(
        recorded.values.iter().any(|v| v.contains(id.as_str())),
        "message id missing from log fields: {:?}",
        recorded.values
    );
}
