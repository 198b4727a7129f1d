//! Poll Worker
//!
//! Background task that keeps one category's store and cache in step with
//! the backend while the transport is connected.
//!
//! ```text
//! DISCONNECTED ──on_connected──▶ CONNECTED (poll task running)
//!      ▲                              │
//!      └──────on_disconnected─────────┘ (task stopped and joined)
//! ```

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::service::{NegotiationService, PollOutcome};
use crate::negotiation::Payload;
use crate::transport::{ConnectionState, TransportError};

/// Configuration for the poll worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before the first fetch after connecting
    pub initial_delay: Duration,
    /// Fixed period between fetches
    pub interval: Duration,
    /// Upper bound of the uniform random delay added to each period
    pub jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(3),
        }
    }
}

impl PollConfig {
    /// Interval plus a random share of the jitter
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

struct PollTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct WorkerState {
    connection: ConnectionState,
    task: Option<PollTask>,
}

/// Poll Worker
///
/// One per category. Store and cache belong to the service and survive any
/// number of connect / disconnect cycles.
pub struct PollWorker<P: Payload> {
    service: Arc<NegotiationService<P>>,
    config: PollConfig,
    // Held across stop and join, so a new task never starts beside a stopping one
    state: Mutex<WorkerState>,
    ticks: Arc<AtomicU64>,
}

impl<P: Payload> PollWorker<P> {
    pub fn new(service: Arc<NegotiationService<P>>, config: PollConfig) -> Self {
        Self {
            service,
            config,
            state: Mutex::new(WorkerState {
                connection: ConnectionState::Disconnected,
                task: None,
            }),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(service: Arc<NegotiationService<P>>) -> Self {
        Self::new(service, PollConfig::default())
    }

    pub fn service(&self) -> &Arc<NegotiationService<P>> {
        &self.service
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    pub async fn is_polling(&self) -> bool {
        self.state.lock().await.task.is_some()
    }

    /// Ticks completed (successful or not) by the poll task
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Run a single poll cycle on the caller's task
    pub async fn tick(&self) -> Result<PollOutcome, TransportError> {
        run_tick(&self.service).await
    }

    /// Start periodic polling; no-op if already running
    ///
    /// Waits for a concurrent `on_disconnected` to finish joining the old task.
    pub async fn on_connected(&self) {
        let mut state = self.state.lock().await;
        state.connection = ConnectionState::Connected;
        if state.task.is_some() {
            debug!(category = %self.service.category(), "Poll task already running");
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            self.service.clone(),
            self.config.clone(),
            stop_rx,
            self.ticks.clone(),
        ));
        state.task = Some(PollTask { stop, handle });

        info!(
            category = %self.service.category(),
            initial_delay_ms = self.config.initial_delay.as_millis() as u64,
            interval_ms = self.config.interval.as_millis() as u64,
            "Poll task started"
        );
    }

    /// Stop periodic polling and wait for the task to finish
    ///
    /// A tick already in flight completes; none starts after this returns.
    pub async fn on_disconnected(&self) {
        let mut state = self.state.lock().await;
        state.connection = ConnectionState::Disconnected;
        let Some(task) = state.task.take() else {
            return;
        };

        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
            error!(category = %self.service.category(), error = %e, "Poll task ended abnormally");
        }
        info!(category = %self.service.category(), "Poll task stopped");
    }

    /// Follow the transport's connectivity until it goes away
    pub fn bind(self: Arc<Self>) -> JoinHandle<()> {
        let mut connectivity = self.service.connectivity();
        tokio::spawn(async move {
            loop {
                let state = *connectivity.borrow_and_update();
                match state {
                    ConnectionState::Connected => self.on_connected().await,
                    ConnectionState::Disconnected => self.on_disconnected().await,
                }
                if connectivity.changed().await.is_err() {
                    debug!(category = %self.service.category(), "Connectivity channel closed");
                    self.on_disconnected().await;
                    break;
                }
            }
        })
    }
}

async fn run_tick<P: Payload>(service: &NegotiationService<P>) -> Result<PollOutcome, TransportError> {
    let outcome = service.poll_once().await?;
    if outcome.snapshot.changed() || outcome.removed > 0 {
        info!(
            category = %service.category(),
            inserted = outcome.snapshot.inserted,
            updated = outcome.snapshot.updated,
            rejected = outcome.snapshot.rejected,
            added = outcome.added,
            removed = outcome.removed,
            "Poll merged changes"
        );
    }
    Ok(outcome)
}

async fn poll_loop<P: Payload>(
    service: Arc<NegotiationService<P>>,
    config: PollConfig,
    mut stop: watch::Receiver<bool>,
    ticks: Arc<AtomicU64>,
) {
    let mut delay = config.initial_delay;
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if *stop.borrow() {
            break;
        }

        if let Err(e) = run_tick(&service).await {
            warn!(
                category = %service.category(),
                error = %e,
                code = e.code(),
                "Poll failed; keeping current state"
            );
        }
        ticks.fetch_add(1, Ordering::SeqCst);
        delay = config.next_delay();
    }
    debug!(category = %service.category(), "Poll loop exited");
}
