//! Frame pacer
//!
//! Triggers broadcast cycles on a fixed timer, independent of how fast
//! sources produce data.
//!
//! ```text
//!  tick ──► in_flight.try_acquire()
//!             │ Some(guard)                 │ None
//!             ▼                             ▼
//!     spawn { run_cycle(); completed++ }   dropped++   (skip, never queue)
//!
//!  every report_window: emit AchievedRate(completed in window)
//! ```
//!
//! At most one cycle per target is ever in flight, so overload costs frames,
//! not memory.

pub mod flight;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::event::{EventSink, StatusEvent, TransportKind};
use crate::stats::{rate_per_second, PacerStats};

pub use flight::{InFlight, InFlightGuard};

/// Smallest accepted target interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Something the pacer can drive
pub trait BroadcastCycle: Send + Sync + 'static {
    /// Transport label for rate reports
    fn transport(&self) -> TransportKind;

    /// The target's in-flight indicator
    fn in_flight(&self) -> &Arc<InFlight>;

    /// Run one snapshot-and-fan-out cycle
    fn run_cycle(&self) -> impl Future<Output = ()> + Send;
}

/// Pacer configuration
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Time between ticks; 5 ms caps broadcasting at 200 Hz
    pub target_interval: Duration,

    /// Length of the achieved-rate reporting window
    pub report_window: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            target_interval: Duration::from_millis(5),
            report_window: Duration::from_secs(1),
        }
    }
}

impl PacerConfig {
    /// Set the target interval (clamped to [`MIN_INTERVAL`])
    pub fn target_interval(mut self, interval: Duration) -> Self {
        self.target_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the target rate in Hz
    pub fn target_rate(self, hz: u32) -> Self {
        let hz = hz.max(1);
        self.target_interval(Duration::from_micros(1_000_000 / hz as u64))
    }

    /// Set the reporting window
    pub fn report_window(mut self, window: Duration) -> Self {
        self.report_window = window.max(MIN_INTERVAL);
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    dropped: AtomicU64,
    window: AtomicU64,
    last_rate: AtomicU64,
}

struct Run {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Fixed-rate cycle scheduler for one broadcast target
pub struct FramePacer<C: BroadcastCycle> {
    config: Mutex<PacerConfig>,
    target: Arc<C>,
    counters: Arc<Counters>,
    events: EventSink,
    run: Mutex<Option<Run>>,
}

impl<C: BroadcastCycle> FramePacer<C> {
    pub fn new(config: PacerConfig, target: Arc<C>, events: EventSink) -> Self {
        Self {
            config: Mutex::new(config),
            target,
            counters: Arc::new(Counters::default()),
            events,
            run: Mutex::new(None),
        }
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config(&self) -> PacerConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Configured target interval
    pub fn target_interval(&self) -> Duration {
        self.config().target_interval
    }

    /// Change the target interval, restarting the timer if running
    pub async fn set_target_interval(&self, interval: Duration) {
        let was_running = self.is_running();
        self.stop().await;

        {
            let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
            *config = config.clone().target_interval(interval);
        }

        if was_running {
            // Cannot already be running: stop() cleared the slot above
            let _ = self.start();
        }
    }

    /// Start ticking. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut run = self.lock_run();
        if run.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let config = self.config();
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.counters.window.store(0, Ordering::Relaxed);

        tracing::info!(
            transport = %self.target.transport(),
            interval_us = config.target_interval.as_micros() as u64,
            "Pacer started"
        );

        let task = tokio::spawn(pace(
            Arc::clone(&self.target),
            config,
            Arc::clone(&self.counters),
            self.events.clone(),
            shutdown_rx,
        ));

        *run = Some(Run { shutdown, task });
        Ok(())
    }

    /// Stop ticking and wait for any in-flight cycle to finish
    pub async fn stop(&self) {
        let Some(run) = self.lock_run().take() else {
            return;
        };

        let _ = run.shutdown.send(true);
        let _ = run.task.await;

        tracing::info!(transport = %self.target.transport(), "Pacer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lock_run().is_some()
    }

    /// Cycles per second over the last completed window
    pub fn achieved_rate(&self) -> u64 {
        self.counters.last_rate.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PacerStats {
        PacerStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            achieved_rate: self.achieved_rate(),
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn pace<C: BroadcastCycle>(
    target: Arc<C>,
    config: PacerConfig,
    counters: Arc<Counters>,
    events: EventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.target_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut report = interval_at(Instant::now() + config.report_window, config.report_window);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycle: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => break,

            _ = report.tick() => {
                let count = counters.window.swap(0, Ordering::Relaxed);
                let rate = rate_per_second(count, config.report_window);
                counters.last_rate.store(rate, Ordering::Relaxed);

                tracing::trace!(transport = %target.transport(), rate = rate, "Achieved rate");
                events.emit(StatusEvent::AchievedRate {
                    transport: target.transport(),
                    frames_per_sec: rate,
                });
            }

            _ = ticker.tick() => {
                match target.in_flight().try_acquire() {
                    Some(guard) => {
                        let target = Arc::clone(&target);
                        let counters = Arc::clone(&counters);

                        cycle = Some(tokio::spawn(async move {
                            target.run_cycle().await;
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                            counters.window.fetch_add(1, Ordering::Relaxed);
                            drop(guard);
                        }));
                    }
                    None => {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(transport = %target.transport(), "Cycle in flight, tick skipped");
                    }
                }
            }
        }
    }

    // Let the last cycle finish; no new one can start
    if let Some(cycle) = cycle {
        let _ = cycle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use tokio::sync::mpsc;

    use super::*;

    /// Cycle that takes a fixed time and records overlap
    struct FakeCycle {
        flight: Arc<InFlight>,
        duration: Duration,
        running: AtomicUsize,
        max_running: AtomicUsize,
        runs: AtomicUsize,
        finished_last: AtomicBool,
    }

    impl FakeCycle {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                flight: InFlight::new(),
                duration,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
                finished_last: AtomicBool::new(true),
            })
        }
    }

    impl BroadcastCycle for FakeCycle {
        fn transport(&self) -> TransportKind {
            TransportKind::Network
        }

        fn in_flight(&self) -> &Arc<InFlight> {
            &self.flight
        }

        async fn run_cycle(&self) {
            self.finished_last.store(false, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);

            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished_last.store(true, Ordering::SeqCst);
        }
    }

    async fn next_rate(rx: &mut mpsc::Receiver<StatusEvent>) -> u64 {
        loop {
            if let Some(StatusEvent::AchievedRate { frames_per_sec, .. }) = rx.recv().await {
                return frames_per_sec;
            }
        }
    }

    #[test]
    fn test_config_defaults_and_clamping() {
        let config = PacerConfig::default();
        assert_eq!(config.target_interval, Duration::from_millis(5));
        assert_eq!(config.report_window, Duration::from_secs(1));

        let config = PacerConfig::default().target_interval(Duration::ZERO);
        assert_eq!(config.target_interval, MIN_INTERVAL);

        let config = PacerConfig::default().target_rate(100);
        assert_eq!(config.target_interval, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_achieved_rate_matches_target() {
        let target = FakeCycle::new(Duration::ZERO);
        let (events, mut rx) = EventSink::channel(16);
        let pacer = FramePacer::new(PacerConfig::default(), Arc::clone(&target), events);

        pacer.start().unwrap();

        // floor(1000ms / 5ms) = 200, within one
        let rate = next_rate(&mut rx).await;
        assert!((199..=201).contains(&rate), "rate was {}", rate);

        let rate = next_rate(&mut rx).await;
        assert!((199..=201).contains(&rate), "rate was {}", rate);
        assert_eq!(pacer.achieved_rate(), rate);

        pacer.stop().await;
        assert_eq!(pacer.stats().dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_skips_ticks_without_queueing() {
        let target = FakeCycle::new(Duration::from_millis(12));
        let pacer = FramePacer::new(PacerConfig::default(), Arc::clone(&target), EventSink::disabled());

        pacer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        pacer.stop().await;

        let stats = pacer.stats();
        assert_eq!(target.max_running.load(Ordering::SeqCst), 1);
        assert!(stats.completed > 0);
        // Each 12 ms cycle spans two further 5 ms ticks
        assert!(stats.dropped >= stats.completed, "{:?}", stats);
        // Nothing queued: every tick either ran a cycle or was dropped
        assert!(stats.completed + stats.dropped <= 61, "{:?}", stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_in_flight_cycle() {
        let target = FakeCycle::new(Duration::from_millis(50));
        let pacer = FramePacer::new(PacerConfig::default(), Arc::clone(&target), EventSink::disabled());

        pacer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!target.finished_last.load(Ordering::SeqCst));

        pacer.stop().await;
        assert!(target.finished_last.load(Ordering::SeqCst));
        assert!(!target.flight.is_busy());

        // No cycles after stop
        let runs = target.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(target.runs.load(Ordering::SeqCst), runs);
        assert!(!pacer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_while_running() {
        let target = FakeCycle::new(Duration::ZERO);
        let (events, mut rx) = EventSink::channel(16);
        let pacer = FramePacer::new(PacerConfig::default(), Arc::clone(&target), events);

        pacer.start().unwrap();
        pacer.set_target_interval(Duration::from_millis(10)).await;
        assert!(pacer.is_running());
        assert_eq!(pacer.target_interval(), Duration::from_millis(10));

        let rate = next_rate(&mut rx).await;
        assert!((99..=101).contains(&rate), "rate was {}", rate);

        pacer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let target = FakeCycle::new(Duration::ZERO);
        let pacer = FramePacer::new(PacerConfig::default(), target, EventSink::disabled());

        pacer.start().unwrap();
        assert!(matches!(pacer.start(), Err(Error::AlreadyRunning)));
        pacer.stop().await;

        // Restartable after stop
        pacer.start().unwrap();
        pacer.stop().await;
    }
}
