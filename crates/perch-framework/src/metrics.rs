//! Asynchronous latency aggregation for the scheduling pipeline.
//!
//! The pipeline must never block on observability: observations go through
//! a bounded channel with `try_send` and are dropped on overflow (counted,
//! not backpressured). A single consumer task batches them into histogram
//! maps on an interval tick and drains the buffer on shutdown.

use crate::status::Code;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cumulative latency histogram: sample count and sum of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Histogram {
    pub count: u64,
    pub sum: f64,
}

impl Histogram {
    fn observe(&mut self, seconds: f64) {
        self.count += 1;
        self.sum += seconds;
    }
}

#[derive(Debug)]
enum Observation {
    ExtensionPoint {
        extension_point: &'static str,
        status: Code,
        profile: String,
        seconds: f64,
    },
    Plugin {
        extension_point: &'static str,
        plugin: String,
        status: Code,
        seconds: f64,
    },
    PermitWait {
        result: Code,
        seconds: f64,
    },
}

#[derive(Debug, Default)]
struct HistogramStore {
    /// Keyed by (extension_point, status, profile).
    extension_point_duration: HashMap<(String, String, String), Histogram>,
    /// Keyed by (extension_point, plugin, status).
    plugin_execution_duration: HashMap<(String, String, String), Histogram>,
    /// Keyed by result label.
    permit_wait_duration: HashMap<String, Histogram>,
}

impl HistogramStore {
    fn apply(&mut self, observation: Observation) {
        match observation {
            Observation::ExtensionPoint {
                extension_point,
                status,
                profile,
                seconds,
            } => {
                self.extension_point_duration
                    .entry((extension_point.to_string(), status.to_string(), profile))
                    .or_default()
                    .observe(seconds);
            }
            Observation::Plugin {
                extension_point,
                plugin,
                status,
                seconds,
            } => {
                self.plugin_execution_duration
                    .entry((extension_point.to_string(), plugin, status.to_string()))
                    .or_default()
                    .observe(seconds);
            }
            Observation::PermitWait { result, seconds } => {
                self.permit_wait_duration
                    .entry(result.to_string())
                    .or_default()
                    .observe(seconds);
            }
        }
    }
}

/// Bounded, lossy, asynchronous recorder for per-plugin and per-stage
/// latency.
pub struct MetricsRecorder {
    tx: mpsc::Sender<Observation>,
    rx: Mutex<mpsc::Receiver<Observation>>,
    store: RwLock<HistogramStore>,
    dropped: AtomicU64,
    stop: CancellationToken,
    stopped: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MetricsRecorder {
    /// Spawn a recorder with the given buffer size and flush interval.
    /// Must be called from within a tokio runtime.
    pub fn new(buffer_size: usize, interval: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let (stopped_tx, stopped_rx) = oneshot::channel();

        let recorder = Arc::new(Self {
            tx,
            rx: Mutex::new(rx),
            store: RwLock::new(HistogramStore::default()),
            dropped: AtomicU64::new(0),
            stop: CancellationToken::new(),
            stopped: Mutex::new(Some(stopped_rx)),
        });

        let consumer = recorder.clone();
        let interval = interval.max(Duration::from_nanos(1));
        tokio::spawn(async move {
            consumer.run(interval, stopped_tx).await;
        });

        recorder
    }

    async fn run(&self, interval: Duration, stopped_tx: oneshot::Sender<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    self.flush();
                    debug!("metrics recorder stopped");
                    let _ = stopped_tx.send(());
                    return;
                }
                _ = ticker.tick() => {
                    self.flush();
                }
            }
        }
    }

    /// Drain every buffered observation into the histograms. Exposed for
    /// test cleanup; the consumer calls it on each tick.
    pub fn flush(&self) {
        let mut rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut store = match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Ok(observation) = rx.try_recv() {
            store.apply(observation);
        }
    }

    /// Signal the consumer to drain and terminate, then wait for it.
    pub async fn stop(&self) {
        self.stop.cancel();
        let stopped = {
            let mut slot = match self.stopped.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        if let Some(stopped) = stopped {
            let _ = stopped.await;
        }
    }

    fn push(&self, observation: Observation) {
        if self.tx.try_send(observation).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Non-blocking; drops the observation when the buffer is full.
    pub fn observe_extension_point_duration(
        &self,
        extension_point: &'static str,
        status: Code,
        profile: &str,
        elapsed: Duration,
    ) {
        self.push(Observation::ExtensionPoint {
            extension_point,
            status,
            profile: profile.to_string(),
            seconds: elapsed.as_secs_f64(),
        });
    }

    /// Non-blocking; drops the observation when the buffer is full.
    pub fn observe_plugin_duration(
        &self,
        extension_point: &'static str,
        plugin: &str,
        status: Code,
        elapsed: Duration,
    ) {
        self.push(Observation::Plugin {
            extension_point,
            plugin: plugin.to_string(),
            status,
            seconds: elapsed.as_secs_f64(),
        });
    }

    /// Non-blocking; drops the observation when the buffer is full.
    pub fn observe_permit_wait_duration(&self, result: Code, elapsed: Duration) {
        self.push(Observation::PermitWait {
            result,
            seconds: elapsed.as_secs_f64(),
        });
    }

    /// Observations lost to buffer overflow.
    pub fn dropped_observations(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn read_store(&self) -> std::sync::RwLockReadGuard<'_, HistogramStore> {
        match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of one `framework_extension_point_duration` series.
    pub fn extension_point_duration(
        &self,
        extension_point: &str,
        status: &str,
        profile: &str,
    ) -> Option<Histogram> {
        self.read_store()
            .extension_point_duration
            .get(&(
                extension_point.to_string(),
                status.to_string(),
                profile.to_string(),
            ))
            .copied()
    }

    /// Snapshot of one `plugin_execution_duration` series.
    pub fn plugin_duration(
        &self,
        extension_point: &str,
        plugin: &str,
        status: &str,
    ) -> Option<Histogram> {
        self.read_store()
            .plugin_execution_duration
            .get(&(
                extension_point.to_string(),
                plugin.to_string(),
                status.to_string(),
            ))
            .copied()
    }

    /// Snapshot of one `permit_wait_duration` series.
    pub fn permit_wait_duration(&self, result: &str) -> Option<Histogram> {
        self.read_store()
            .permit_wait_duration
            .get(result)
            .copied()
    }

    /// Number of distinct `framework_extension_point_duration` series.
    pub fn extension_point_series(&self) -> usize {
        self.read_store().extension_point_duration.len()
    }
}
