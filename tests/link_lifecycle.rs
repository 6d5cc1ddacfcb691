//! Link lifecycle tests: sending, disconnect semantics and send callbacks.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use package_link::link::{
    callback_fn, package_channel, LinkContext, LinkDisconnectSink, LinkId, ReceivedPackage,
    StreamLink, TransportKind,
};
use package_link::utils::Metrics;
use package_link::{KeyMaterial, Link, LinkSettings, Package, ProtocolError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct CountingSink {
    calls: AtomicUsize,
}

impl LinkDisconnectSink for CountingSink {
    fn on_link_disconnected(&self, _id: LinkId, identity: &str) {
        assert!(!identity.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingSink {
    fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct Endpoint {
    link: Link,
    inbound: UnboundedReceiverStream<ReceivedPackage>,
    sink: Arc<CountingSink>,
    keys: Arc<KeyMaterial>,
    metrics: Arc<Metrics>,
}

fn endpoint(seed: u8, identity: &str, stream: DuplexStream) -> Endpoint {
    endpoint_with(seed, identity, stream, LinkSettings::default())
}

fn endpoint_with(seed: u8, identity: &str, stream: DuplexStream, settings: LinkSettings) -> Endpoint {
    let keys = Arc::new(KeyMaterial::from_private_bytes([seed; 32]));
    let (receiver, inbound) = package_channel();
    let sink = Arc::new(CountingSink::default());
    let metrics = Arc::new(Metrics::new());
    let counting: Weak<CountingSink> = Arc::downgrade(&sink);
    let weak: Weak<dyn LinkDisconnectSink> = counting;
    let ctx = LinkContext::new(TransportKind::Memory, Arc::clone(&keys), Arc::new(receiver))
        .with_settings(settings)
        .with_metrics(Arc::clone(&metrics))
        .with_disconnect_sink(weak);
    Endpoint {
        link: Link::from(StreamLink::spawn(identity, stream, Arc::new(ctx))),
        inbound,
        sink,
        keys,
        metrics,
    }
}

/// A link on one end of a duplex pipe and the raw peer on the other
fn link_with_raw_peer() -> (Endpoint, DuplexStream) {
    let (local, peer) = tokio::io::duplex(4096);
    (endpoint(1, "raw-peer", local), peer)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached within deadline");
}

#[tokio::test]
async fn test_send_writes_one_frame() {
    let (ep, peer) = link_with_raw_peer();
    let package = Package::new("kdeconnect.ping").with_field("message", "hello");

    ep.link.send(package.clone()).await.unwrap();

    let mut lines = BufReader::new(peer).lines();
    let line = lines.next_line().await.unwrap().expect("one line");
    assert_eq!(Package::deserialize(&line).unwrap(), package);
}

#[tokio::test]
async fn test_payload_is_stripped_on_stream_links() {
    let (ep, peer) = link_with_raw_peer();
    let mut package = Package::new("kdeconnect.share.request").with_field("filename", "a.txt");
    package.set_payload(Some(1024), None);

    ep.link.send(package).await.unwrap();

    let mut lines = BufReader::new(peer).lines();
    let line = lines.next_line().await.unwrap().expect("one line");
    let received = Package::deserialize(&line).unwrap();
    assert!(!received.has_payload());
    assert!(!line.contains("payloadSize"));
    assert_eq!(received.get("filename").unwrap(), "a.txt");
}

#[tokio::test]
async fn test_send_after_disconnect_touches_nothing() {
    let (ep, mut peer) = link_with_raw_peer();

    ep.link.disconnect().await;
    let err = ep.link.send(Package::new("kdeconnect.ping")).await.unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));

    let key = ep.keys.public_key();
    let err = ep
        .link
        .send_encrypted(Package::new("kdeconnect.ping"), &key)
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));

    // The peer sees a closed stream and not a single byte
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(2), peer.read_to_end(&mut buf))
        .await
        .expect("peer sees close")
        .unwrap();
    assert_eq!(read, 0);
    // Both rejected sends still count as failures
    assert_eq!(ep.metrics.snapshot().send_failures, 2);
    assert_eq!(ep.metrics.snapshot().packages_sent, 0);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (ep, _peer) = link_with_raw_peer();

    let first = ep.link.clone();
    let second = ep.link.clone();
    tokio::join!(first.disconnect(), second.disconnect(), ep.link.disconnect());
    ep.link.disconnect().await;

    assert!(!ep.link.is_connected());
    assert_eq!(ep.sink.count(), 1);
}

#[tokio::test]
async fn test_remote_close_disconnects_once() {
    let (ep, peer) = link_with_raw_peer();
    drop(peer);

    let sink = Arc::clone(&ep.sink);
    wait_until(move || sink.count() == 1).await;
    assert!(!ep.link.is_connected());

    // A late local disconnect does not notify again
    ep.link.disconnect().await;
    assert_eq!(ep.sink.count(), 1);
}

#[tokio::test]
async fn test_callback_reports_success() {
    let (ep, _peer) = link_with_raw_peer();
    let (tx, rx) = oneshot::channel();

    ep.link
        .send_with_callback(Package::new("kdeconnect.ping"), None, tx)
        .await;

    assert!(rx.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_callback_reports_failure_once() {
    let (ep, _peer) = link_with_raw_peer();
    ep.link.disconnect().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let callback = callback_fn(move |outcome: package_link::Result<()>| {
        assert!(matches!(outcome, Err(ProtocolError::NotConnected)));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let key = ep.keys.public_key();
    ep.link
        .send_with_callback(Package::new("kdeconnect.ping"), Some(&key), callback)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_encrypted_exchange_between_links() {
    let (left, right) = tokio::io::duplex(4096);
    let alice = endpoint(10, "bob-device", left);
    let mut bob = endpoint(20, "alice-device", right);

    let package = Package::new("kdeconnect.clipboard").with_field("content", "secret");
    alice
        .link
        .send_encrypted(package.clone(), &bob.keys.public_key())
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(2), bob.inbound.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.identity, "alice-device");
    assert_eq!(received.package, package);
    assert!(!received.package.is_encrypted());
}

#[tokio::test]
async fn test_concurrent_sends_never_interleave() {
    let (left, right) = tokio::io::duplex(512);
    let sender = endpoint(30, "receiver", left);
    let mut receiver = endpoint(40, "sender", right);

    let filler = "x".repeat(700);
    let mut tasks = Vec::new();
    for i in 0..32 {
        let link = sender.link.clone();
        let filler = filler.clone();
        tasks.push(tokio::spawn(async move {
            let package = Package::new("kdeconnect.test")
                .with_field("seq", i)
                .with_field("filler", filler);
            link.send(package).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..32 {
        let received = timeout(Duration::from_secs(2), receiver.inbound.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.package.get("filler").unwrap(), filler.as_str());
        seen.push(received.package.get("seq").unwrap().as_i64().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..32).collect::<Vec<i64>>());
    assert_eq!(receiver.sink.count(), 0);
}

#[tokio::test]
async fn test_timed_out_send_tears_down_link() {
    // The peer never reads, so a frame larger than the pipe cannot finish
    let (local, mut peer) = tokio::io::duplex(64);
    let settings = LinkSettings {
        write_timeout: Duration::from_millis(50),
        ..LinkSettings::default()
    };
    let ep = endpoint_with(2, "slow-peer", local, settings);

    let stalled = Package::new("failed.send").with_field("filler", "x".repeat(4096));
    let err = ep.link.send(stalled).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
    assert!(!ep.link.is_connected());
    assert_eq!(ep.sink.count(), 1);

    // Nothing from the failed send may ride along with a later one
    let err = ep.link.send(Package::new("second.send")).await.unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));

    let mut buf = Vec::new();
    timeout(Duration::from_secs(2), peer.read_to_end(&mut buf))
        .await
        .expect("peer sees close")
        .unwrap();
    assert!(!buf.contains(&b'\n'), "no complete frame reached the peer");
    assert!(!String::from_utf8_lossy(&buf).contains("second.send"));

    let snapshot = ep.metrics.snapshot();
    assert_eq!(snapshot.send_failures, 2);
    assert_eq!(snapshot.transport_errors, 1);
    assert_eq!(snapshot.packages_sent, 0);
}

#[tokio::test]
async fn test_cancelled_send_tears_down_link() {
    let (local, mut peer) = tokio::io::duplex(64);
    let ep = endpoint_with(3, "slow-peer", local, LinkSettings::default());

    // Give up on a send that cannot complete while the peer is not reading
    let stalled = Package::new("cancelled.send").with_field("filler", "x".repeat(4096));
    let abandoned = timeout(Duration::from_millis(50), ep.link.send(stalled)).await;
    assert!(abandoned.is_err());
    assert!(ep.link.is_connected());

    let err = ep.link.send(Package::new("second.send")).await.unwrap_err();
    assert!(matches!(err, ProtocolError::NotConnected));
    assert!(!ep.link.is_connected());
    assert_eq!(ep.sink.count(), 1);

    let mut buf = Vec::new();
    timeout(Duration::from_secs(2), peer.read_to_end(&mut buf))
        .await
        .expect("peer sees close")
        .unwrap();
    assert!(!buf.contains(&b'\n'));
    assert!(!String::from_utf8_lossy(&buf).contains("second.send"));
}
