//! Transport - one framed, paced, fanned-out IRC connection.
//!
//! A Transport owns three loops:
//! - read: decode lines, parse frames, push them onto the primary queue
//! - write: drain the outbound queue, one frame per pacing slot
//! - fan-out: started by the first [`Transport::subscribe`], copies every
//!   frame from the primary queue to each registered subscriber
//!
//! Any decode, parse or encode failure tears the whole Transport down. Frames
//! are offered to every subscriber before the next one is taken, so a slow
//! subscriber slows everyone rather than missing frames.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sitbot_proto::{IrcCodec, LineCodec, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use super::dial;
use super::limit::{self, Pacer};
use crate::error::TransportError;

/// Outbound queue depth. `send` blocks once it is full.
const OUTBOUND_QUEUE: usize = 1;
/// Frames buffered between the read loop and the fan-out.
const PRIMARY_QUEUE: usize = 16;
/// Per-subscriber queue depth.
const SUBSCRIBER_QUEUE: usize = 16;

/// Cheaply clonable handle to a live connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    outbound: mpsc::Sender<Message>,
    primary: Mutex<Option<mpsc::Receiver<Message>>>,
    registry: Arc<Mutex<Registry>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Arc<Counters>,
    next_subscriber: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct Counters {
    tx: AtomicU64,
    rx: AtomicU64,
}

#[derive(Default)]
struct Registry {
    subscribers: Vec<Subscriber>,
    started: bool,
    closed: bool,
}

struct Subscriber {
    id: u64,
    queue: mpsc::Sender<Message>,
    done: CancellationToken,
}

/// A consumer's view of the inbound stream.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    queue: mpsc::Receiver<Message>,
    done: CancellationToken,
    registry: Arc<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next inbound frame, or `None` once the Transport is torn down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.queue.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.done.cancel();
        remove_subscriber(&self.registry, self.id);
    }
}

/// Drop subscriber `id` and release a delivery blocked on its queue.
fn remove_subscriber(registry: &Mutex<Registry>, id: u64) {
    registry.lock().subscribers.retain(|s| {
        if s.id == id {
            s.done.cancel();
        }
        s.id != id
    });
}

impl Transport {
    /// Dial `server` (optionally through `proxy`) and wrap the connection.
    pub async fn connect(
        server: &str,
        proxy: Option<&str>,
        write_interval: Duration,
        parent: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let stream = dial::dial(server, proxy).await?;
        Ok(Self::new(stream, write_interval, parent))
    }

    /// Wrap an already established byte stream.
    pub fn new<S>(stream: S, write_interval: Duration, parent: &CancellationToken) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (primary_tx, primary_rx) = mpsc::channel(PRIMARY_QUEUE);

        let cancel = parent.child_token();
        let tracker = TaskTracker::new();
        let counters = Arc::new(Counters::default());

        tracker.spawn(read_loop(
            reader,
            primary_tx,
            cancel.clone(),
            Arc::clone(&counters),
        ));
        tracker.spawn(write_loop(
            writer,
            outbound_rx,
            limit::pacer(write_interval),
            cancel.clone(),
            Arc::clone(&counters),
        ));

        Self {
            inner: Arc::new(Inner {
                outbound: outbound_tx,
                primary: Mutex::new(Some(primary_rx)),
                registry: Arc::new(Mutex::new(Registry::default())),
                cancel,
                tracker,
                counters,
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Queue a frame for the write loop.
    ///
    /// Blocks until the frame is accepted or the Transport is torn down.
    pub async fn send(&self, msg: Message) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(TransportError::Closed),
            sent = self.inner.outbound.send(msg) => sent.map_err(|_| TransportError::Closed),
        }
    }

    /// Register a new inbound consumer.
    pub fn subscribe(&self) -> Subscription {
        let (queue_tx, queue_rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let done = CancellationToken::new();

        let mut registry = self.inner.registry.lock();
        if registry.closed {
            // queue_tx drops here, so the subscriber sees a closed queue
            debug!(subscriber = id, "subscribe after teardown");
        } else {
            registry.subscribers.push(Subscriber {
                id,
                queue: queue_tx,
                done: done.clone(),
            });
            if !registry.started {
                registry.started = true;
                if let Some(primary) = self.inner.primary.lock().take() {
                    self.inner.tracker.spawn(fan_out(
                        primary,
                        Arc::clone(&self.inner.registry),
                        self.inner.cancel.clone(),
                    ));
                }
            }
        }
        drop(registry);

        Subscription {
            id,
            queue: queue_rx,
            done,
            registry: Arc::clone(&self.inner.registry),
        }
    }

    /// Remove a consumer by id. Safe to call concurrently with delivery.
    pub fn unsubscribe(&self, id: u64) {
        remove_subscriber(&self.inner.registry, id);
    }

    /// Tear the connection down and wait for every loop to exit.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.closed().await;
    }

    /// Resolves once the Transport has been torn down.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Frames written so far.
    pub fn tx_frames(&self) -> u64 {
        self.inner.counters.tx.load(Ordering::Relaxed)
    }

    /// Frames decoded so far.
    pub fn rx_frames(&self) -> u64 {
        self.inner.counters.rx.load(Ordering::Relaxed)
    }
}

async fn read_loop<R>(
    reader: R,
    primary: mpsc::Sender<Message>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = FramedRead::new(reader, LineCodec::new());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            None => {
                debug!("connection closed by peer");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "read failed");
                break;
            }
            Some(Ok(line)) => line,
        };
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            debug!("empty line skipped");
            continue;
        }
        let msg = match line.parse::<Message>() {
            Ok(msg) => msg,
            Err(e) => {
                warn!(line = %line.trim_end(), error = %e, "malformed frame");
                break;
            }
        };
        trace!(frame = %line.trim_end(), "recv");
        counters.rx.fetch_add(1, Ordering::Relaxed);

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = primary.send(msg) => if sent.is_err() { break },
        }
    }
    cancel.cancel();
}

async fn write_loop<W>(
    writer: W,
    mut outbound: mpsc::Receiver<Message>,
    pacer: Pacer,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut sink = FramedWrite::new(writer, IrcCodec::new());
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if !limit::wait(&pacer, &cancel).await {
            break;
        }
        trace!(frame = %msg.to_string().trim_end(), "send");
        if let Err(e) = sink.send(msg).await {
            warn!(error = %e, "write failed");
            break;
        }
        counters.tx.fetch_add(1, Ordering::Relaxed);
    }
    cancel.cancel();
    let _ = sink.close().await;
}

async fn fan_out(
    mut primary: mpsc::Receiver<Message>,
    registry: Arc<Mutex<Registry>>,
    cancel: CancellationToken,
) {
    'frames: while let Some(msg) = primary.recv().await {
        let snapshot: Vec<(mpsc::Sender<Message>, CancellationToken)> = registry
            .lock()
            .subscribers
            .iter()
            .map(|s| (s.queue.clone(), s.done.clone()))
            .collect();

        for (queue, done) in snapshot {
            tokio::select! {
                _ = cancel.cancelled() => break 'frames,
                _ = done.cancelled() => {}
                _ = queue.send(msg.clone()) => {}
            }
        }
    }

    let mut registry = registry.lock();
    registry.closed = true;
    registry.subscribers.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitbot_proto::Command;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn pair(interval: Duration) -> (Transport, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(4096);
        (Transport::new(ours, interval, &CancellationToken::new()), theirs)
    }

    #[tokio::test]
    async fn test_subscribers_see_same_frames_in_order() {
        let (transport, mut peer) = pair(Duration::ZERO);
        let mut a = transport.subscribe();
        let mut b = transport.subscribe();

        peer.write_all(b"PING :1\r\nPING :2\r\n\r\nPING :3\r\n")
            .await
            .unwrap();

        for sub in [&mut a, &mut b] {
            for want in ["1", "2", "3"] {
                let msg = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
                assert_eq!(msg.command, Command::PING);
                assert_eq!(msg.param(0), Some(want));
            }
        }
        assert_eq!(transport.rx_frames(), 3);
    }

    #[tokio::test]
    async fn test_malformed_frame_tears_down() {
        let (transport, mut peer) = pair(Duration::ZERO);
        let mut sub = transport.subscribe();

        peer.write_all(b":prefix-only\r\n").await.unwrap();
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
        timeout(WAIT, transport.closed()).await.unwrap();
        assert!(matches!(
            transport.send(Message::ping("x")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_eof_closes_subscribers() {
        let (transport, peer) = pair(Duration::ZERO);
        let mut sub = transport.subscribe();
        drop(peer);
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());

        let mut late = transport.subscribe();
        assert!(timeout(WAIT, late.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_subscription_does_not_block_others() {
        let (transport, mut peer) = pair(Duration::ZERO);
        let slow = transport.subscribe();
        let mut live = transport.subscribe();

        let mut burst = String::new();
        for i in 0..(SUBSCRIBER_QUEUE * 2) {
            burst.push_str(&format!("PING :{i}\r\n"));
        }
        peer.write_all(burst.as_bytes()).await.unwrap();
        drop(slow);

        for i in 0..(SUBSCRIBER_QUEUE * 2) {
            let msg = timeout(WAIT, live.recv()).await.unwrap().unwrap();
            assert_eq!(msg.param(0), Some(i.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_during_delivery_releases_others() {
        let (transport, mut peer) = pair(Duration::ZERO);
        let idle = transport.subscribe();
        let mut live = transport.subscribe();
        let total = SUBSCRIBER_QUEUE * 4;

        let mut burst = String::new();
        for i in 0..total {
            burst.push_str(&format!("PING :{i}\r\n"));
        }
        peer.write_all(burst.as_bytes()).await.unwrap();

        // Fan-out now waits on the full idle queue
        for i in 0..SUBSCRIBER_QUEUE {
            let msg = timeout(WAIT, live.recv()).await.unwrap().unwrap();
            assert_eq!(msg.param(0), Some(i.to_string().as_str()));
        }
        transport.unsubscribe(idle.id());

        for i in SUBSCRIBER_QUEUE..total {
            let msg = timeout(WAIT, live.recv()).await.unwrap().unwrap();
            assert_eq!(msg.param(0), Some(i.to_string().as_str()));
        }
        drop(idle);
    }

    #[tokio::test]
    async fn test_writes_are_paced() {
        let (transport, peer) = pair(Duration::from_millis(40));
        let start = tokio::time::Instant::now();
        for i in 0..3 {
            transport.send(Message::ping(i.to_string())).await.unwrap();
        }

        let mut lines = BufReader::new(peer).lines();
        for i in 0..3 {
            let line = timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
            assert_eq!(line, format!("PING {i}"));
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert_eq!(transport.tx_frames(), 3);
    }

    #[tokio::test]
    async fn test_close_unblocks_send() {
        let (transport, _peer) = pair(Duration::from_secs(60));
        transport.send(Message::ping("a")).await.unwrap();

        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move {
                // The first frame used the only slot; these back up behind it
                for token in ["b", "c", "d", "e"] {
                    transport.send(Message::ping(token)).await?;
                }
                Ok::<(), TransportError>(())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        timeout(WAIT, transport.close()).await.unwrap();

        let result = timeout(WAIT, pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes() {
        let parent = CancellationToken::new();
        let (ours, _theirs) = tokio::io::duplex(64);
        let transport = Transport::new(ours, Duration::ZERO, &parent);
        parent.cancel();
        timeout(WAIT, transport.closed()).await.unwrap();
        assert!(transport.is_closed());
    }
}
