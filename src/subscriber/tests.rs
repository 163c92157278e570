use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::runtime::Runtime;

use super::handler::CONTENT_LENGTH;
use super::{
    DecodedMessage, MessageHandler, MessageObserver, Progress, SessionConfig, SessionOutcome,
    SessionState, Subscriber,
};
use crate::app::{EXIT_ABORTED, EXIT_OK};
use crate::codec::Decompressor;
use crate::endpoint::{Credentials, InboundMessage, MemoryBroker, MessageBody};
use crate::utils::error::EndpointError;

const TOPIC: &str = "darwin.pushport-v16";

#[derive(Default)]
struct CollectingObserver {
    messages: Mutex<Vec<DecodedMessage>>,
}

impl CollectingObserver {
    fn contents(&self) -> Vec<String> {
        let mut contents: Vec<String> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        contents.sort();
        contents
    }
}

impl MessageObserver for CollectingObserver {
    fn on_decoded(&self, message: &DecodedMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

struct PanickingObserver;

impl MessageObserver for PanickingObserver {
    fn on_decoded(&self, _message: &DecodedMessage) {
        panic!("observer exploded");
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn valid_message(id: &str, text: &str) -> InboundMessage {
    InboundMessage::new(id, MessageBody::Bytes(gzip(text.as_bytes())))
        .with_type("pushport")
        .with_property(CONTENT_LENGTH, text.len().to_string())
        .with_property("PushPortSequence", "42")
}

fn handler_with(
    expected: usize,
    observer: Arc<dyn MessageObserver>,
) -> (MessageHandler, Arc<Progress>) {
    let progress = Arc::new(Progress::new(expected));
    let handler = MessageHandler::new(progress.clone(), Decompressor::default(), observer);
    (handler, progress)
}

fn session_config(expected: usize, timeout: Duration) -> SessionConfig {
    SessionConfig {
        credentials: Credentials {
            address: "memory://local".to_string(),
            client_id: "test.feedsub".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
        },
        topic: TOPIC.to_string(),
        expected_messages: expected,
        wait_timeout: timeout,
        decompressor: Decompressor::default(),
    }
}

#[test]
fn handler_decodes_valid_message() {
    let observer = Arc::new(CollectingObserver::default());
    let (handler, progress) = handler_with(1, observer.clone());

    handler.handle(valid_message("id-1", "<Pport/>"));

    let messages = observer.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    let decoded = &messages[0];
    assert_eq!(decoded.ordinal, 1);
    assert_eq!(decoded.content, "<Pport/>");
    assert_eq!(decoded.message_type, "pushport");
    assert_eq!(decoded.message_id, "id-1");
    assert_eq!(
        decoded.properties,
        vec![
            (CONTENT_LENGTH.to_string(), "8".to_string()),
            ("PushPortSequence".to_string(), "42".to_string()),
        ]
    );
    assert_eq!(progress.counter.count(), 0);
    assert_eq!(progress.decoded(), 1);
    assert_eq!(progress.failed(), 0);
}

#[test]
fn handler_skips_non_bytes_message_and_still_counts_down() {
    let observer = Arc::new(CollectingObserver::default());
    let (handler, progress) = handler_with(2, observer.clone());

    handler.handle(InboundMessage::new("t", MessageBody::Text("plain".to_string())));

    assert!(observer.messages.lock().unwrap().is_empty());
    assert_eq!(progress.counter.count(), 1);
    assert_eq!(progress.received(), 1);
    assert_eq!(progress.failed(), 1);
}

#[test]
fn handler_skips_missing_or_bad_content_length() {
    let observer = Arc::new(CollectingObserver::default());
    let (handler, progress) = handler_with(3, observer.clone());
    let body = gzip(b"hello");

    handler.handle(InboundMessage::new("a", MessageBody::Bytes(body.clone())));
    handler.handle(
        InboundMessage::new("b", MessageBody::Bytes(body.clone()))
            .with_property(CONTENT_LENGTH, "five"),
    );
    handler.handle(
        InboundMessage::new("c", MessageBody::Bytes(body)).with_property(CONTENT_LENGTH, "-5"),
    );

    assert!(observer.messages.lock().unwrap().is_empty());
    assert_eq!(progress.counter.count(), 0);
    assert_eq!(progress.failed(), 3);
}

#[test]
fn handler_skips_undecodable_body() {
    let observer = Arc::new(CollectingObserver::default());
    let (handler, progress) = handler_with(1, observer.clone());

    handler.handle(
        InboundMessage::new("x", MessageBody::Bytes(vec![0x00, 0x01, 0x02]))
            .with_property(CONTENT_LENGTH, "3"),
    );

    assert!(observer.messages.lock().unwrap().is_empty());
    assert_eq!(progress.counter.count(), 0);
    assert_eq!(progress.failed(), 1);
}

#[test]
fn handler_counts_down_when_observer_panics() {
    let (handler, progress) = handler_with(1, Arc::new(PanickingObserver));

    handler.handle(valid_message("p", "boom"));

    assert_eq!(progress.counter.count(), 0);
    assert_eq!(progress.received(), 1);
    assert_eq!(progress.decoded(), 0);
    assert_eq!(progress.failed(), 1);
}

#[test]
fn handler_is_safe_under_concurrent_delivery() {
    let observer = Arc::new(CollectingObserver::default());
    let (handler, progress) = handler_with(16, observer.clone());
    let callback = Arc::new(handler).into_callback();

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let callback = callback.clone();
            thread::spawn(move || callback(valid_message(&format!("m{i}"), &format!("text {i}"))))
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(progress.received(), 16);
    assert_eq!(progress.counter.count(), 0);
    let mut ordinals: Vec<usize> = observer
        .messages
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.ordinal)
        .collect();
    ordinals.sort();
    assert_eq!(ordinals, (1..=16).collect::<Vec<_>>());
}

#[test]
fn session_completes_after_expected_messages() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let observer = Arc::new(CollectingObserver::default());
    let subscriber = Arc::new(Subscriber::new(
        broker.clone(),
        session_config(3, Duration::from_secs(10)),
        observer.clone(),
    ));
    assert_eq!(subscriber.state(), SessionState::Idle);

    let worker = {
        let subscriber = subscriber.clone();
        thread::spawn(move || subscriber.run())
    };
    subscriber.progress().gate.wait();
    assert_eq!(broker.listener_count(TOPIC), 1);

    let started = Instant::now();
    for i in 0..3 {
        let delivered = broker.publish(TOPIC, valid_message(&format!("m{i}"), &format!("body {i}")));
        assert_eq!(delivered, 1);
    }
    let report = worker.join().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.received, 3);
    assert_eq!(report.decoded, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(observer.contents(), vec!["body 0", "body 1", "body 2"]);
    assert_eq!(subscriber.state(), SessionState::Closed);

    let stats = broker.stats();
    assert!(stats.all_released(), "{stats:?}");
    assert_eq!(broker.listener_count(TOPIC), 0);
}

#[test]
fn session_times_out_when_feed_goes_quiet() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let observer = Arc::new(CollectingObserver::default());
    let handle = Subscriber::new(
        broker.clone(),
        session_config(5, Duration::from_millis(200)),
        observer.clone(),
    )
    .spawn()
    .unwrap();

    handle.wait_until_ready();
    broker.publish(TOPIC, valid_message("a", "one"));
    broker.publish(TOPIC, valid_message("b", "two"));
    let report = handle.join().unwrap();

    assert_eq!(report.outcome, SessionOutcome::TimedOut);
    assert_eq!(report.outcome.exit_code(), EXIT_OK);
    assert_eq!(report.received, 2);
    assert_eq!(report.remaining, 3);
    assert!(broker.stats().all_released());
}

#[test]
fn session_counts_failed_messages_toward_completion() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let observer = Arc::new(CollectingObserver::default());
    let handle = Subscriber::new(
        broker.clone(),
        session_config(3, Duration::from_secs(10)),
        observer.clone(),
    )
    .spawn()
    .unwrap();

    handle.wait_until_ready();
    broker.publish(TOPIC, valid_message("ok", "fine"));
    broker.publish(
        TOPIC,
        InboundMessage::new("txt", MessageBody::Text("not compressed".to_string())),
    );
    broker.publish(
        TOPIC,
        InboundMessage::new("bad", MessageBody::Bytes(vec![0, 1, 2]))
            .with_property(CONTENT_LENGTH, "3"),
    );
    let report = handle.join().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.decoded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(observer.contents(), vec!["fine"]);
}

#[test]
fn session_with_zero_expected_messages_closes_immediately() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let subscriber = Subscriber::new(
        broker.clone(),
        session_config(0, Duration::from_secs(10)),
        Arc::new(CollectingObserver::default()),
    );

    let report = subscriber.run();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(subscriber.state(), SessionState::Closed);
    assert!(broker.stats().all_released());
}

#[test]
fn setup_failure_opens_gate_and_fails() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    broker.refuse_connections("no route to host");
    let subscriber = Subscriber::new(
        broker.clone(),
        session_config(3, Duration::from_secs(10)),
        Arc::new(CollectingObserver::default()),
    );

    let report = subscriber.run();

    assert!(subscriber.progress().gate.is_open());
    assert_eq!(subscriber.state(), SessionState::Failed);
    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed(EndpointError::Connect { .. })
    ));
    assert_eq!(report.outcome.exit_code(), EXIT_OK);
    assert_eq!(report.remaining, 3);
    assert_eq!(broker.connect_attempts(), 1);
    assert!(broker.stats().all_released());
}

#[test]
fn setup_failure_after_session_releases_partial_resources() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let mut config = session_config(3, Duration::from_secs(10));
    config.topic = String::new();
    let subscriber = Subscriber::new(
        broker.clone(),
        config,
        Arc::new(CollectingObserver::default()),
    );

    let report = subscriber.run();

    assert!(subscriber.progress().gate.is_open());
    assert_eq!(subscriber.state(), SessionState::Failed);
    assert!(matches!(
        report.outcome,
        SessionOutcome::Failed(EndpointError::Subscribe(_))
    ));
    let stats = broker.stats();
    assert_eq!(stats.connections_opened, 1);
    assert_eq!(stats.connections_closed, 1);
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.destinations_resolved, 0);
    assert_eq!(stats.consumers_created, 0);
    assert!(stats.all_released(), "{stats:?}");
}

#[test]
fn fault_during_setup_aborts_once_ready() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    broker.fault_during_setup(EndpointError::Transport("reset during setup".to_string()));
    let subscriber = Subscriber::new(
        broker.clone(),
        session_config(4, Duration::from_secs(30)),
        Arc::new(CollectingObserver::default()),
    );

    let started = Instant::now();
    let report = subscriber.run();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(subscriber.progress().gate.is_open());
    assert_eq!(
        report.outcome,
        SessionOutcome::Aborted(EndpointError::Transport("reset during setup".to_string()))
    );
    assert_eq!(report.remaining, 4);
    assert_eq!(subscriber.state(), SessionState::Closed);
    let stats = broker.stats();
    assert_eq!(stats.consumers_created, 1);
    assert!(stats.all_released(), "{stats:?}");
}

#[test]
fn transport_fault_aborts_draining_session() {
    let rt = runtime();
    let broker = MemoryBroker::new(rt.handle().clone());
    let handle = Subscriber::new(
        broker.clone(),
        session_config(10, Duration::from_secs(30)),
        Arc::new(CollectingObserver::default()),
    )
    .spawn()
    .unwrap();

    handle.wait_until_ready();
    let started = Instant::now();
    let fault = EndpointError::Transport("connection reset".to_string());
    assert_eq!(broker.fail_connections(fault.clone()), 1);
    let report = handle.join().unwrap();

    assert_eq!(report.outcome, SessionOutcome::Aborted(fault));
    assert_eq!(report.outcome.exit_code(), EXIT_ABORTED);
    assert!(started.elapsed() < Duration::from_secs(30));
    let stats = broker.stats();
    assert!(stats.all_released(), "{stats:?}");
}
