use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Shared progress and cancellation state updated atomically by all chains.
///
/// Chains only ever increment counters and poll the cancel flag; nothing
/// here is read back into the sampling dynamics.
pub struct ProgressState {
    pub total_iters: usize,
    pub completed: AtomicUsize,
    pub divergences: AtomicUsize,
    pub done: AtomicBool,
    cancelled: AtomicBool,
    pub start_time: Instant,
    pub num_chains: usize,
}

impl ProgressState {
    pub fn new(num_chains: usize, num_draws: usize, num_warmup: usize) -> Self {
        Self {
            total_iters: num_chains * (num_warmup + num_draws),
            completed: AtomicUsize::new(0),
            divergences: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
            num_chains,
        }
    }

    pub fn increment(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_divergence(&self) {
        self.divergences.fetch_add(1, Ordering::Relaxed);
    }

    /// Ask every chain to stop after its current trajectory.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}

fn fmt_time(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0) as usize;
        let s = (secs % 60.0) as usize;
        format!("{}:{:02}", mins, s)
    }
}

fn report(state: &ProgressState) {
    let completed = state.completed();
    let total = state.total_iters;
    let divs = state.divergences.load(Ordering::Relaxed);
    let elapsed = state.start_time.elapsed().as_secs_f64();

    let pct = if total > 0 {
        (completed * 100 / total).min(100)
    } else {
        0
    };
    let speed = if elapsed > 0.05 {
        completed as f64 / elapsed
    } else {
        0.0
    };
    let remaining = if speed > 0.0 && completed < total {
        (total - completed) as f64 / speed
    } else {
        0.0
    };

    info!(
        target: "rwfit_core::progress",
        chains = state.num_chains,
        completed,
        total,
        percent = pct,
        divergences = divs,
        iters_per_sec = speed.round(),
        elapsed = %fmt_time(elapsed),
        eta = %fmt_time(remaining),
        "sampling progress"
    );
}

/// Spawn a background thread that logs progress every `interval`.
/// Returns a join handle; call `state.finish()` then `handle.join()` to
/// clean up after sampling.
pub fn spawn_progress_thread(
    state: Arc<ProgressState>,
    interval: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let tick = Duration::from_millis(50).min(interval);
        let mut last = Instant::now();
        while !state.done.load(Ordering::Relaxed) {
            std::thread::sleep(tick);
            if last.elapsed() >= interval {
                report(&state);
                last = Instant::now();
            }
        }
        report(&state);
    })
}
