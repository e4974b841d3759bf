//! Rest timer supervisor.
//!
//! Each exercise gets at most one running countdown. A countdown is a tokio
//! task ticking once per `tick`; when it reaches zero it leaves the active
//! set and emits a single [`RestTimerEvent::Finished`] for whatever plays the
//! sound or shows the banner. Timers are client-local and never persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Signal emitted by the supervisor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestTimerEvent {
    Finished { exercise_id: Uuid },
}

struct ActiveTimer {
    remaining: u32,
    generation: u64,
    cancel: CancellationToken,
}

type ActiveTimers = Arc<Mutex<HashMap<Uuid, ActiveTimer>>>;

fn lock(active: &ActiveTimers) -> MutexGuard<'_, HashMap<Uuid, ActiveTimer>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns every running rest countdown
pub struct RestTimerSupervisor {
    active: ActiveTimers,
    events: mpsc::UnboundedSender<RestTimerEvent>,
    tick: Duration,
    cancel: CancellationToken,
    generations: AtomicU64,
}

impl RestTimerSupervisor {
    /// Create a supervisor and the receiver its completion signals arrive on
    pub fn new(tick: Duration) -> (Self, mpsc::UnboundedReceiver<RestTimerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            events,
            tick,
            cancel: CancellationToken::new(),
            generations: AtomicU64::new(0),
        };
        (supervisor, rx)
    }

    /// Start a countdown of `seconds` ticks for `exercise_id`.
    ///
    /// Returns `false` without touching the running timer if one is already
    /// active for this exercise. Must be called from within a tokio runtime.
    pub fn start(&self, exercise_id: Uuid, seconds: u32) -> bool {
        let mut active = lock(&self.active);
        if active.contains_key(&exercise_id) {
            tracing::debug!(exercise_id = %exercise_id, "rest timer already running");
            return false;
        }

        if seconds == 0 {
            drop(active);
            let _ = self.events.send(RestTimerEvent::Finished { exercise_id });
            return true;
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        active.insert(
            exercise_id,
            ActiveTimer {
                remaining: seconds,
                generation,
                cancel: cancel.clone(),
            },
        );
        drop(active);

        tracing::info!(exercise_id = %exercise_id, seconds, "rest timer started");

        let timers = Arc::clone(&self.active);
        let events = self.events.clone();
        let tick = self.tick;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let mut active = lock(&timers);
                let Some(timer) = active
                    .get_mut(&exercise_id)
                    .filter(|t| t.generation == generation)
                else {
                    return;
                };

                timer.remaining = timer.remaining.saturating_sub(1);
                if timer.remaining == 0 {
                    active.remove(&exercise_id);
                    drop(active);
                    tracing::info!(exercise_id = %exercise_id, "rest timer finished");
                    let _ = events.send(RestTimerEvent::Finished { exercise_id });
                    return;
                }
            }
        });

        true
    }

    /// Seconds left on the exercise's running timer
    pub fn remaining(&self, exercise_id: Uuid) -> Option<u32> {
        lock(&self.active).get(&exercise_id).map(|t| t.remaining)
    }

    pub fn is_active(&self, exercise_id: Uuid) -> bool {
        lock(&self.active).contains_key(&exercise_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Cancel one timer without signalling. Returns whether one was running.
    pub fn stop(&self, exercise_id: Uuid) -> bool {
        match lock(&self.active).remove(&exercise_id) {
            Some(timer) => {
                timer.cancel.cancel();
                tracing::debug!(exercise_id = %exercise_id, "rest timer stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer; remaining time is discarded
    pub fn shutdown(&self) {
        self.cancel.cancel();
        lock(&self.active).clear();
    }
}

impl Drop for RestTimerSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::sleep;

    fn supervisor() -> (RestTimerSupervisor, mpsc::UnboundedReceiver<RestTimerEvent>) {
        RestTimerSupervisor::new(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_counts_down_and_signals_once() {
        let (timers, mut rx) = supervisor();
        let id = Uuid::new_v4();

        assert!(timers.start(id, 3));
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(timers.remaining(id), Some(2));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RestTimerEvent::Finished { exercise_id: id }
        );
        assert!(!timers.is_active(id));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop_while_active() {
        let (timers, mut rx) = supervisor();
        let id = Uuid::new_v4();

        assert!(timers.start(id, 2));
        sleep(Duration::from_millis(1500)).await;
        assert!(!timers.start(id, 60));
        assert_eq!(timers.remaining(id), Some(1));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RestTimerEvent::Finished { exercise_id: id }
        );

        // Once finished the exercise can rest again.
        assert!(timers.start(id, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_exercises_run_concurrently() {
        let (timers, mut rx) = supervisor();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(timers.start(a, 2));
        assert!(timers.start(b, 1));
        assert_eq!(timers.active_count(), 2);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RestTimerEvent::Finished { exercise_id: b }
        );
        assert!(timers.is_active(a));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            RestTimerEvent::Finished { exercise_id: a }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_without_signal() {
        let (timers, mut rx) = supervisor();
        let id = Uuid::new_v4();

        timers.start(id, 2);
        assert!(timers.stop(id));
        assert!(!timers.stop(id));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_all_timers() {
        let (timers, mut rx) = supervisor();
        timers.start(Uuid::new_v4(), 2);
        timers.start(Uuid::new_v4(), 3);

        timers.shutdown();
        assert_eq!(timers.active_count(), 0);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}
