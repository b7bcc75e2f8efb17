//! Message bus assembly and dispatch.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use missive_core::{
    CancellationToken, InMemoryRepository, MessageKind, MessageQuery, MessageRepository,
    PipelineError, ProcessingStatus, ServiceRegistry,
};
use missive_framework::{HandlerCatalog, Reply, ValidationMiddleware};
use missive_runtime::config::{LocatorKind, PipelineConfig};
use missive_runtime::{MessageBus, RuntimeError};
use serde::Serialize;

// ─── Domain ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Overflow;

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tally overflow")
    }
}

impl Error for Overflow {}

#[derive(Default)]
struct Tally {
    count: AtomicU64,
}

#[derive(Debug, Serialize)]
struct Add {
    amount: u64,
}

#[derive(Debug, Serialize)]
struct Explode;

#[derive(Debug, Serialize)]
struct Total;

#[derive(Debug, Serialize)]
struct AwaitShutdown;

#[derive(Debug, Serialize)]
struct Reset;

struct TallyHandlers {
    tally: Arc<Tally>,
}

impl TallyHandlers {
    fn new(tally: Arc<Tally>) -> Self {
        Self { tally }
    }

    fn add(&self, cmd: Arc<Add>) -> Result<u64, Overflow> {
        let previous = self.tally.count.fetch_add(cmd.amount, Ordering::SeqCst);
        previous.checked_add(cmd.amount).ok_or(Overflow)
    }

    fn explode(&self, _cmd: Arc<Explode>) -> Result<(), Overflow> {
        Err(Overflow)
    }

    fn total(&self, _query: Arc<Total>) -> Reply<u64> {
        Reply(self.tally.count.load(Ordering::SeqCst))
    }

    async fn await_shutdown(
        self: Arc<Self>,
        _query: Arc<AwaitShutdown>,
        token: CancellationToken,
    ) -> Reply<bool> {
        token.cancelled().await;
        Reply(true)
    }

    fn reset(&self, _event: Arc<Reset>) {
        self.tally.count.store(0, Ordering::SeqCst);
    }
}

fn catalog() -> Arc<HandlerCatalog> {
    let mut catalog = HandlerCatalog::new();
    catalog
        .register::<TallyHandlers>()
        .marker(MessageKind::Command)
        .marker(MessageKind::Query)
        .marker(MessageKind::Event)
        .constructor(TallyHandlers::new)
        .handles::<Add, _, _>(TallyHandlers::add)
        .handles::<Explode, _, _>(TallyHandlers::explode)
        .handles::<Total, _, _>(TallyHandlers::total)
        .handles_async::<AwaitShutdown, _, _>(TallyHandlers::await_shutdown)
        .handles::<Reset, _, _>(TallyHandlers::reset);
    Arc::new(catalog)
}

fn services() -> Arc<ServiceRegistry> {
    let services = Arc::new(ServiceRegistry::new());
    services.singleton(Tally::default());
    services
}

fn bus_with(config: PipelineConfig) -> MessageBus {
    MessageBus::builder()
        .catalog(catalog())
        .resolver(services())
        .config(config)
        .validation(ValidationMiddleware::new().rule(|add: &Add| {
            if add.amount == 0 {
                Err("amount must be positive".into())
            } else {
                Ok(())
            }
        }))
        .build()
        .unwrap()
}

fn bus() -> MessageBus {
    bus_with(PipelineConfig::default())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn test_default_pipeline_layout() {
    let bus = bus();
    for kind in MessageKind::ALL {
        assert_eq!(
            bus.pipeline(kind).ids(),
            vec![
                "tracing",
                "handler-locator",
                "validation",
                "handler-resolver",
                "handler-executor",
            ]
        );
    }
    assert!(bus.repository().is_none());

    let bare = bus_with(PipelineConfig {
        tracing: false,
        validation: false,
        record_messages: true,
        ..Default::default()
    });
    assert_eq!(
        bare.pipeline(MessageKind::Command).ids(),
        vec![
            "handler-locator",
            "handler-resolver",
            "handler-executor",
            "recording",
        ]
    );
    assert!(bare.repository().is_some());
}

#[test]
fn test_send_query_publish() {
    let bus = bus();

    let message = bus.send(Add { amount: 3 }).unwrap();
    assert_eq!(message.status(), ProcessingStatus::Completed);
    bus.send(Add { amount: 4 }).unwrap();

    let total: u64 = bus.query(Total).unwrap();
    assert_eq!(total, 7);

    let message = bus.publish(Reset).unwrap();
    assert_eq!(message.kind(), MessageKind::Event);
    assert_eq!(bus.query::<_, u64>(Total).unwrap(), 0);
}

#[test]
fn test_query_result_type_mismatch() {
    let bus = bus();
    let result = bus.query::<_, String>(Total);
    assert!(matches!(
        result,
        Err(RuntimeError::ResultType { expected, found, .. })
            if expected == std::any::type_name::<String>() && found == "u64"
    ));

    // Unit methods produce no result.
    let result = bus.query::<_, u64>(Reset);
    assert!(matches!(result, Err(RuntimeError::NoResult { .. })));
}

#[test]
fn test_validation_rejects() {
    let bus = bus();
    let result = bus.send(Add { amount: 0 });
    match result {
        Err(RuntimeError::Rejected { reasons, .. }) => {
            assert_eq!(reasons, vec!["amount must be positive".to_string()]);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(bus.query::<_, u64>(Total).unwrap(), 0);
}

#[test]
fn test_failure_rethrown_or_reported() {
    let bus = bus();
    let error = bus.send(Explode).unwrap_err();
    let processing = error
        .as_pipeline()
        .and_then(PipelineError::as_processing)
        .unwrap();
    assert!(processing.failure().downcast_ref::<Overflow>().is_some());

    let lenient = bus_with(PipelineConfig {
        throw_on_fail: false,
        ..Default::default()
    });
    let message = lenient.send(Explode).unwrap();
    assert_eq!(message.status(), ProcessingStatus::Failed);
    assert_eq!(message.error_message(), Some("tally overflow"));
}

#[test]
fn test_recording_keeps_failed_attempts() {
    let repository = Arc::new(InMemoryRepository::new());
    let bus = MessageBus::builder()
        .catalog(catalog())
        .resolver(services())
        .repository(repository.clone())
        .config(PipelineConfig {
            record_messages: true,
            ..Default::default()
        })
        .build()
        .unwrap();

    bus.send(Add { amount: 1 }).unwrap();
    assert!(bus.send(Explode).is_err());

    assert_eq!(repository.len(), 2);
    let query: MessageQuery = "contenttype=Explode;status=Failed".parse().unwrap();
    let failed = repository.query(&query).unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error_type.as_deref().unwrap().ends_with("Overflow"));
}

#[test]
fn test_naming_convention_from_config() {
    let bus = bus_with(PipelineConfig {
        locator: missive_runtime::config::LocatorConfig {
            strategy: LocatorKind::NamingConvention,
            suffix: "Handlers".into(),
        },
        ..Default::default()
    });

    // `AddHandlers` does not exist, so nothing is found.
    let error = bus.send(Add { amount: 1 }).unwrap_err();
    assert!(error.as_pipeline().unwrap().is_configuration());
}

#[test]
fn test_shutdown_refuses_messages() {
    let bus = bus();
    bus.shutdown();
    bus.shutdown();
    assert!(bus.is_shut_down());
    assert!(matches!(bus.send(Add { amount: 1 }), Err(RuntimeError::ShutDown)));
    assert!(bus.pipeline(MessageKind::Command).is_empty());
}

#[tokio::test]
async fn test_async_paths() {
    let bus = bus();
    bus.send_async(Add { amount: 5 }).await.unwrap();
    let total: u64 = bus.query_async(Total).await.unwrap();
    assert_eq!(total, 5);
    bus.publish_async(Reset).await.unwrap();
    assert_eq!(bus.query_async::<_, u64>(Total).await.unwrap(), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_queries() {
    let bus = bus();
    let (result, ()) = tokio::join!(
        bus.query_async::<_, bool>(AwaitShutdown),
        bus.run_until(tokio::time::sleep(Duration::from_millis(20))),
    );

    // The handler sees the cancelled token; the remaining steps do not run.
    assert!(matches!(result, Err(RuntimeError::Pipeline(PipelineError::Cancelled))));
}
