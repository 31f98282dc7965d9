//! Periodic refresh scheduling
//!
//! Each armed timer owns one background task. The task refreshes the cache on
//! every tick and reports the outcome. While `start` is waiting for a first
//! success, outcomes go to the queue owned by that call, which is the only
//! consumer the core relies on. Otherwise they are offered on two bounded
//! observer queues (success and error) that embedding applications may drain.
//!
//! Cancellation is best-effort: `stop` and `restart` halt the timer and wake
//! the task only if it is currently waiting. A refresh already in flight runs
//! to completion and still reports its outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use super::manager::ServiceCache;
use crate::error::CacheError;

/// Capacity of each outcome queue; outcomes beyond it are logged and dropped
const SIGNAL_QUEUE_CAPACITY: usize = 16;

type Outcome = Result<(), CacheError>;

/// Queues carrying refresh outcomes from the background task
pub(crate) struct Signals {
    startup: Mutex<Option<mpsc::Sender<Outcome>>>,
    success_tx: mpsc::Sender<()>,
    error_tx: mpsc::Sender<CacheError>,
    success_rx: AsyncMutex<mpsc::Receiver<()>>,
    error_rx: AsyncMutex<mpsc::Receiver<CacheError>>,
}

impl Signals {
    pub(crate) fn new() -> Self {
        let (success_tx, success_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        Self {
            startup: Mutex::new(None),
            success_tx,
            error_tx,
            success_rx: AsyncMutex::new(success_rx),
            error_rx: AsyncMutex::new(error_rx),
        }
    }

    /// Route outcomes to a fresh queue until the returned receiver is released
    fn subscribe_startup(&self) -> mpsc::Receiver<Outcome> {
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        *self.startup.lock() = Some(tx);
        rx
    }

    fn release_startup(&self) {
        self.startup.lock().take();
    }

    fn publish(&self, outcome: Outcome) {
        match &outcome {
            Ok(()) => debug!("Scheduled refresh succeeded"),
            Err(e) => warn!("Scheduled refresh failed: {}", e),
        }

        let startup = self.startup.lock().clone();
        let dropped = match (startup, outcome) {
            (Some(tx), outcome) => matches!(tx.try_send(outcome), Err(TrySendError::Full(_))),
            (None, Ok(())) => {
                matches!(self.success_tx.try_send(()), Err(TrySendError::Full(_)))
            }
            (None, Err(e)) => matches!(self.error_tx.try_send(e), Err(TrySendError::Full(_))),
        };

        if dropped {
            debug!("Refresh outcome queue full, dropping outcome");
        }
    }
}

/// A running periodic timer and its background task
pub(crate) struct Ticker {
    period: Duration,
    halted: Arc<AtomicBool>,
    abort: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn(cache: Weak<ServiceCache>, period: Duration) -> Self {
        let halted = Arc::new(AtomicBool::new(false));
        let abort = Arc::new(Notify::new());

        let handle = tokio::spawn(run_ticker(cache, period, halted.clone(), abort.clone()));

        Self {
            period,
            halted,
            abort,
            handle,
        }
    }

    /// Stop producing ticks and wake the task if it is waiting right now
    fn halt(self) {
        self.halted.store(true, Ordering::SeqCst);
        self.abort.notify_waiters();
        debug!(
            "Halted refresh timer (period: {:?}, task finished: {})",
            self.period,
            self.handle.is_finished()
        );
    }
}

async fn run_ticker(
    cache: Weak<ServiceCache>,
    period: Duration,
    halted: Arc<AtomicBool>,
    abort: Arc<Notify>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick (which fires immediately)
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if halted.load(Ordering::SeqCst) {
                    break;
                }
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let outcome = cache.refresh().await;
                cache.signals.publish(outcome);
            }
            _ = abort.notified() => break,
        }
    }

    debug!("Refresh task for period {:?} exited", period);
}

fn ensure_period(period: Duration) -> Result<(), CacheError> {
    if period.is_zero() {
        return Err(CacheError::Configuration(
            "refresh period must be non-zero".to_string(),
        ));
    }
    Ok(())
}

impl ServiceCache {
    /// Refresh once, then keep the cache refreshed every `period`
    ///
    /// The periodic timer is armed whether or not the initial refresh
    /// succeeds. On failure, up to `max_retries` scheduled outcomes are
    /// awaited, sleeping `retry_delay` after each error; the first success
    /// marks the cache running. When the budget is exhausted the timer is
    /// halted and the cache stays stopped.
    pub async fn start(
        self: &Arc<Self>,
        period: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<(), CacheError> {
        ensure_period(period)?;
        if self.is_running() {
            return Err(CacheError::Configuration(
                "cache is already running".to_string(),
            ));
        }

        info!(
            "Starting service cache (period: {:?}, max retries: {}, retry delay: {:?})",
            period, max_retries, retry_delay
        );

        let mut outcomes = self.signals.subscribe_startup();

        let initial = self.refresh().await;
        self.restart(period);

        let mut started = initial.is_ok();
        if let Err(e) = initial {
            warn!("Initial refresh failed, retrying: {}", e);

            for attempt in 1..=max_retries {
                match outcomes.recv().await {
                    Some(Ok(())) => {
                        started = true;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Refresh retry {}/{} failed: {}", attempt, max_retries, e);
                        sleep(retry_delay).await;
                    }
                    None => break,
                }
            }
        }

        self.signals.release_startup();

        if !started {
            if let Some(ticker) = self.ticker.lock().take() {
                ticker.halt();
            }
            return Err(CacheError::StartFailure {
                attempts: max_retries,
            });
        }

        self.running.store(true, Ordering::SeqCst);
        info!("Service cache started");
        Ok(())
    }

    /// Halt periodic refresh; returns false if the cache was not running
    pub fn stop(&self) -> bool {
        let mut ticker = self.ticker.lock();

        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        if let Some(ticker) = ticker.take() {
            ticker.halt();
        }

        info!("Service cache stopped");
        true
    }

    /// Replace the periodic timer with a fresh one firing every `period`
    ///
    /// Unlike `start`, this does not refresh immediately or retry. A zero
    /// period is rejected and leaves the current timer in place.
    pub fn restart(self: &Arc<Self>, period: Duration) -> bool {
        if let Err(e) = ensure_period(period) {
            warn!("Not restarting refresh timer: {}", e);
            return false;
        }

        let mut ticker = self.ticker.lock();

        if let Some(old) = ticker.take() {
            old.halt();
        }

        debug!("Arming refresh timer (period: {:?})", period);
        *ticker = Some(Ticker::spawn(Arc::downgrade(self), period));
        true
    }

    /// Wait for the next successful scheduled refresh
    ///
    /// Embedding applications may drain the observer queues; the cache works
    /// the same whether or not they do, and `start` never waits on them.
    pub async fn next_success(&self) -> Option<()> {
        self.signals.success_rx.lock().await.recv().await
    }

    /// Wait for the next failed scheduled refresh outside of `start`
    pub async fn next_error(&self) -> Option<CacheError> {
        self.signals.error_rx.lock().await.recv().await
    }
}
