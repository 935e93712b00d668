use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use updraft::net::protocol::{C2sMessage, Envelope, Ping, ProtocolError, S2cMessage, next_seq};
use updraft::net::{decode_s2c, encode_c2s};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const INPUT_RATE_PER_SEC: f64 = 40.0;
pub const NORMAL_CLOSURE: u16 = 1000;

const BACKOFF_DELAYS_MS: [u64; 5] = [1_000, 2_000, 4_000, 8_000, 15_000];

/// Millisecond wall-clock source, injectable for tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    })
}

// ---------------------------------------------------------------------------
// Socket seam
// ---------------------------------------------------------------------------

/// Raw events from the underlying message stream.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: Option<String> },
    Failure(String),
}

/// Frames the transport hands to the underlying stream.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// One socket attempt: a sink for outbound frames plus the event stream.
/// The connect call itself never blocks; success or failure arrives as the
/// first event.
pub struct SocketSession {
    pub sink: mpsc::UnboundedSender<OutboundFrame>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// The externally supplied connection factory (a WebSocket-equivalent
/// ordered text stream). Injected so the whole session stack runs against
/// fakes in tests and the demo.
pub trait SocketConnector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> SocketSession;
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Decoded events delivered to the session controller.
#[derive(Debug)]
pub enum TransportEvent {
    Opened,
    Message(Envelope<S2cMessage>),
    Closed { code: Option<u16>, reason: Option<String> },
    Failure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed while sending")]
    ConnectionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Reconnect delay schedule. The attempt counter saturates at the last table
/// entry and resets on a successful open.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: usize,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        let index = self.attempt.min(BACKOFF_DELAYS_MS.len() - 1);
        if self.attempt < BACKOFF_DELAYS_MS.len() - 1 {
            self.attempt += 1;
        }
        Duration::from_millis(BACKOFF_DELAYS_MS[index])
    }
}

/// Token bucket gating input-class sends. Refills continuously; a full
/// second's worth of tokens may burst. `acquire` suspends cooperatively
/// until a token is available.
pub struct TokenBucket {
    rate_per_sec: f64,
    max_tokens: f64,
    state: std::sync::Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            rate_per_sec,
            max_tokens: rate_per_sec,
            state: std::sync::Mutex::new(BucketState {
                tokens: rate_per_sec,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let needed = 1.0 - state.tokens;
                Duration::from_secs_f64(needed / self.rate_per_sec).max(Duration::from_millis(1))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Link quality estimates published by the heartbeat, for display and
/// telemetry only; simulation timing never reads these.
#[derive(Debug, Default)]
struct LinkStats {
    rtt_ms: AtomicI64,
    skew_ms: AtomicI64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkSnapshot {
    pub rtt_ms: i64,
    pub skew_ms: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

struct TransportInner {
    connector: Box<dyn SocketConnector>,
    clock: Clock,
    session: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    seq: AtomicU32,
    limiter: TokenBucket,
    stats: LinkStats,
    stopped: AtomicBool,
    run_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Connection layer: owns the socket handle, the reconnect loop with
/// exponential backoff, the heartbeat, outbound rate limiting and the
/// per-connection sequence counter.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(connector: Box<dyn SocketConnector>, clock: Clock) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                connector,
                clock,
                session: Mutex::new(None),
                seq: AtomicU32::new(0),
                limiter: TokenBucket::new(INPUT_RATE_PER_SEC),
                stats: LinkStats::default(),
                stopped: AtomicBool::new(false),
                run_task: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Spawn the reconnect loop for `url` and hand back the event stream.
    /// A previous run, if any, is aborted.
    pub fn start(&self, url: &str) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.inner.stopped.store(false, Ordering::SeqCst);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(Arc::clone(&self.inner), url.to_string(), events_tx));
        if let Some(previous) = self.inner.run_task.lock().unwrap().replace(task) {
            previous.abort();
        }
        events_rx
    }

    /// Encode and send one message. Input-class messages wait for a rate
    /// limiter token first; everything else bypasses the limiter.
    pub async fn send(&self, msg: &C2sMessage) -> Result<(), TransportError> {
        let seq = bump_seq(&self.inner.seq);
        let ts = (self.inner.clock)();
        let text = encode_c2s(msg, seq, ts)?;
        if msg.is_input() {
            self.inner.limiter.acquire().await;
        }
        let guard = self.inner.session.lock().await;
        let sink = guard.as_ref().ok_or(TransportError::NotConnected)?;
        sink.send(OutboundFrame::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)?;
        self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Cancel the reconnect loop, close the active socket with a normal
    /// closure code and clear the handle. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.run_task.lock().unwrap().take() {
            task.abort();
        }
        let mut guard = self.inner.session.lock().await;
        if let Some(sink) = guard.take() {
            let _ = sink.send(OutboundFrame::Close {
                code: NORMAL_CLOSURE,
                reason: "client".to_string(),
            });
        }
    }

    pub fn stats(&self) -> LinkSnapshot {
        LinkSnapshot {
            rtt_ms: self.inner.stats.rtt_ms.load(Ordering::Relaxed),
            skew_ms: self.inner.stats.skew_ms.load(Ordering::Relaxed),
            messages_sent: self.inner.stats.messages_sent.load(Ordering::Relaxed),
            messages_received: self.inner.stats.messages_received.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop(
    inner: Arc<TransportInner>,
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut backoff = Backoff::new();
    loop {
        let mut session = inner.connector.connect(&url);
        {
            let mut guard = inner.session.lock().await;
            *guard = Some(session.sink.clone());
        }

        let mut opened = false;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = session.events.recv() => match event {
                    Some(SocketEvent::Opened) => {
                        opened = true;
                        backoff.reset();
                        heartbeat = tokio::time::interval_at(
                            Instant::now() + HEARTBEAT_INTERVAL,
                            HEARTBEAT_INTERVAL,
                        );
                        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        if events.send(TransportEvent::Opened).is_err() {
                            break;
                        }
                    }
                    Some(SocketEvent::Message(text)) => {
                        handle_message(&inner, &events, &text);
                    }
                    Some(SocketEvent::Closed { code, reason }) => {
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        break;
                    }
                    Some(SocketEvent::Failure(error)) => {
                        let _ = events.send(TransportEvent::Failure(error));
                        break;
                    }
                    // The socket task dropped its sender; treat as a close.
                    None => {
                        let _ = events.send(TransportEvent::Closed { code: None, reason: None });
                        break;
                    }
                },
                _ = heartbeat.tick(), if opened => {
                    send_ping(&inner).await;
                }
            }
        }

        {
            let mut guard = inner.session.lock().await;
            *guard = None;
        }

        if inner.stopped.load(Ordering::SeqCst) || events.is_closed() {
            break;
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }
}

fn handle_message(
    inner: &TransportInner,
    events: &mpsc::UnboundedSender<TransportEvent>,
    text: &str,
) {
    match decode_s2c(text) {
        Ok(Some(envelope)) => {
            inner.stats.messages_received.fetch_add(1, Ordering::Relaxed);
            if let S2cMessage::Pong(pong) = &envelope.payload {
                let received = (inner.clock)();
                let local_send = pong.t0;
                let rtt = received - pong.t0;
                let skew = (pong.t1 + received) / 2 - (pong.t0 + local_send) / 2;
                inner.stats.rtt_ms.store(rtt, Ordering::Relaxed);
                inner.stats.skew_ms.store(skew, Ordering::Relaxed);
            }
            let _ = events.send(TransportEvent::Message(envelope));
        }
        // Unknown message type, already logged by the decoder.
        Ok(None) => {}
        Err(error) => {
            log::warn!("failed to decode server message: {error}");
            let _ = events.send(TransportEvent::Failure(error.to_string()));
        }
    }
}

fn bump_seq(seq: &AtomicU32) -> u32 {
    let mut current = seq.load(Ordering::Relaxed);
    loop {
        let next = next_seq(current);
        match seq.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

async fn send_ping(inner: &TransportInner) {
    let t0 = (inner.clock)();
    let seq = bump_seq(&inner.seq);
    let text = match encode_c2s(&C2sMessage::Ping(Ping { t0 }), seq, t0) {
        Ok(text) => text,
        Err(error) => {
            log::warn!("failed to encode ping: {error}");
            return;
        }
    };
    let guard = inner.session.lock().await;
    if let Some(sink) = guard.as_ref() {
        if sink.send(OutboundFrame::Text(text)).is_ok() {
            inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        }
    }
}
