//! Exponential backoff reconnection for remote connections.
//!
//! While the target sits in `NetworkError`, each call to
//! [`ReconnectController::schedule_reconnect`] arms a one-shot timer for the
//! current interval and doubles the interval up to the ceiling. Reaching the
//! ceiling prompts once per error episode to disable the connection.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use stevedore_types::ConnectionState;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Prompt, Prompter};
use crate::types::ConnectionError;

pub const MIN_INTERVAL: Duration = Duration::from_millis(2_000);
pub const MAX_INTERVAL: Duration = Duration::from_millis(90_000);
pub const GROWTH_FACTOR: u32 = 2;

/// What the controller needs from the connection it drives.
#[async_trait]
pub trait Reconnectable: Send + Sync + 'static {
    fn reconnect_label(&self) -> String;

    fn current_state(&self) -> ConnectionState;

    fn is_toggle_in_progress(&self) -> bool;

    async fn attempt_reconnect(&self) -> Result<(), ConnectionError>;

    async fn disable_after_retries(&self) -> Result<(), ConnectionError>;
}

#[derive(Debug)]
struct ReconnectState {
    interval: Duration,
    timer: Option<JoinHandle<()>>,
    /// Bumped for every armed timer so a stale timer can tell it was replaced.
    generation: u64,
    has_warned_on_ceiling: bool,
}

struct Shared<T: Reconnectable> {
    target: Weak<T>,
    prompter: Arc<dyn Prompter>,
    state: Mutex<ReconnectState>,
}

pub struct ReconnectController<T: Reconnectable> {
    shared: Arc<Shared<T>>,
}

impl<T: Reconnectable> Clone for ReconnectController<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Reconnectable> ReconnectController<T> {
    pub fn new(target: Weak<T>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                target,
                prompter,
                state: Mutex::new(ReconnectState {
                    interval: MIN_INTERVAL,
                    timer: None,
                    generation: 0,
                    has_warned_on_ceiling: false,
                }),
            }),
        }
    }

    /// The delay the next scheduled attempt will use.
    pub fn current_interval(&self) -> Duration {
        self.lock().interval
    }

    pub fn has_pending_timer(&self) -> bool {
        self.lock().timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    /// Arms a reconnect timer if the target is in `NetworkError`; otherwise resets.
    ///
    /// Returns the delay of the armed timer.
    pub fn schedule_reconnect(&self) -> Option<Duration> {
        let Some(target) = self.shared.target.upgrade() else {
            self.reset();
            return None;
        };
        if target.current_state() != ConnectionState::NetworkError {
            self.reset();
            return None;
        }

        let mut state = self.lock();
        let delay = state.interval;
        if delay >= MAX_INTERVAL && !state.has_warned_on_ceiling {
            state.has_warned_on_ceiling = true;
            self.warn_at_ceiling(target.reconnect_label());
        }
        state.interval = (delay * GROWTH_FACTOR).min(MAX_INTERVAL);

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let controller = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.fire(generation).await;
        }));

        debug!(connection = %target.reconnect_label(), delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        Some(delay)
    }

    /// Like [`schedule_reconnect`](Self::schedule_reconnect), but leaves an already armed timer alone.
    pub fn ensure_scheduled(&self) -> Option<Duration> {
        if self.has_pending_timer() {
            return None;
        }
        self.schedule_reconnect()
    }

    /// Cancels any pending timer and restores the initial interval and warning flag.
    pub fn reset(&self) {
        let mut state = self.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.interval = MIN_INTERVAL;
        state.has_warned_on_ceiling = false;
    }

    async fn fire(&self, generation: u64) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            // Drop our own handle so a reset triggered by the attempt does not abort this task.
            state.timer = None;
        }

        let Some(target) = self.shared.target.upgrade() else {
            return;
        };
        if target.is_toggle_in_progress() {
            debug!(connection = %target.reconnect_label(), "reconnect skipped, toggle in progress");
            return;
        }
        if target.current_state() != ConnectionState::NetworkError {
            self.reset();
            return;
        }

        match target.attempt_reconnect().await {
            Ok(()) => {
                info!(connection = %target.reconnect_label(), "reconnected");
                self.reset();
            }
            Err(error) => {
                debug!(connection = %target.reconnect_label(), error = %error, "reconnect attempt failed");
                // The attempt may already have re-armed the timer on its own failure path.
                self.ensure_scheduled();
            }
        }
    }

    fn warn_at_ceiling(&self, label: String) {
        let prompter = self.shared.prompter.clone();
        let target = self.shared.target.clone();
        warn!(connection = %label, "reconnect backoff reached its ceiling");
        tokio::spawn(async move {
            if !prompter.confirm(Prompt::DisableAfterRetries { connection: label.clone() }).await {
                return;
            }
            let Some(target) = target.upgrade() else {
                return;
            };
            if let Err(error) = target.disable_after_retries().await {
                warn!(connection = %label, error = %error, "failed to disable connection after retries");
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, ReconnectState> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Reconnectable> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut()
            && let Some(timer) = state.timer.take()
        {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePrompter;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeTarget {
        state: Mutex<ConnectionState>,
        toggling: AtomicBool,
        attempts: AtomicUsize,
        disabled: AtomicUsize,
        outcomes: Mutex<VecDeque<bool>>,
    }

    impl FakeTarget {
        fn new(state: ConnectionState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                toggling: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                disabled: AtomicUsize::new(0),
                outcomes: Mutex::new(VecDeque::new()),
            })
        }

        fn set_state(&self, state: ConnectionState) {
            *self.state.lock().unwrap() = state;
        }
    }

    #[async_trait]
    impl Reconnectable for FakeTarget {
        fn reconnect_label(&self) -> String {
            "remote-1".to_string()
        }

        fn current_state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }

        fn is_toggle_in_progress(&self) -> bool {
            self.toggling.load(Ordering::SeqCst)
        }

        async fn attempt_reconnect(&self) -> Result<(), ConnectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let succeed = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
            if succeed {
                self.set_state(ConnectionState::Ready);
                Ok(())
            } else {
                Err(ConnectionError::network("http://remote", "refused"))
            }
        }

        async fn disable_after_retries(&self) -> Result<(), ConnectionError> {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            self.set_state(ConnectionState::Disabled);
            Ok(())
        }
    }

    fn controller(target: &Arc<FakeTarget>, prompter: Arc<FakePrompter>) -> ReconnectController<FakeTarget> {
        ReconnectController::new(Arc::downgrade(target), prompter)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interval_doubles_up_to_the_ceiling_and_resets() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::answering(&[false]));

        let delays: Vec<u128> = (0..9).map(|_| reconnect.schedule_reconnect().unwrap().as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 32000, 64000, 90000, 90000, 90000]);

        reconnect.reset();
        assert!(!reconnect.has_pending_timer());
        assert_eq!(reconnect.schedule_reconnect(), Some(MIN_INTERVAL));
        assert_eq!(reconnect.current_interval(), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn outside_network_error_scheduling_only_resets() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::new());
        reconnect.schedule_reconnect();
        reconnect.schedule_reconnect();

        target.set_state(ConnectionState::Ready);
        for _ in 0..3 {
            assert_eq!(reconnect.schedule_reconnect(), None);
        }
        assert!(!reconnect.has_pending_timer());
        assert_eq!(reconnect.current_interval(), MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_scheduled_leaves_an_armed_timer_alone() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::new());

        assert_eq!(reconnect.ensure_scheduled(), Some(Duration::from_millis(2_000)));
        assert_eq!(reconnect.ensure_scheduled(), None);
        assert_eq!(reconnect.current_interval(), Duration::from_millis(4_000));
        assert!(reconnect.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_attempt_resets_backoff() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        target.outcomes.lock().unwrap().push_back(true);
        let reconnect = controller(&target, FakePrompter::new());

        reconnect.schedule_reconnect();
        tokio::time::sleep(Duration::from_millis(2_001)).await;
        settle().await;

        assert_eq!(target.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(target.current_state(), ConnectionState::Ready);
        assert_eq!(reconnect.current_interval(), MIN_INTERVAL);
        assert!(!reconnect.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_reschedules_with_a_longer_delay() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::new());

        reconnect.schedule_reconnect();
        tokio::time::sleep(Duration::from_millis(2_001)).await;
        settle().await;
        assert_eq!(target.attempts.load(Ordering::SeqCst), 1);
        assert!(reconnect.has_pending_timer());
        assert_eq!(reconnect.current_interval(), Duration::from_millis(8_000));

        tokio::time::sleep(Duration::from_millis(4_001)).await;
        settle().await;
        assert_eq!(target.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_is_skipped_while_a_toggle_runs() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::new());
        target.toggling.store(true, Ordering::SeqCst);

        reconnect.schedule_reconnect();
        tokio::time::sleep(Duration::from_millis(2_001)).await;
        settle().await;

        assert_eq!(target.attempts.load(Ordering::SeqCst), 0);
        assert!(!reconnect.has_pending_timer());
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_warning_is_shown_once_per_episode() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let prompter = FakePrompter::answering(&[false, false]);
        let reconnect = controller(&target, prompter.clone());

        for _ in 0..10 {
            reconnect.schedule_reconnect();
        }
        settle().await;
        assert_eq!(prompter.prompts().len(), 1);

        reconnect.reset();
        for _ in 0..8 {
            reconnect.schedule_reconnect();
        }
        settle().await;
        assert_eq!(prompter.prompts().len(), 2);
        assert_eq!(target.disabled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_the_ceiling_warning_disables_the_connection() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let prompter = FakePrompter::answering(&[true]);
        let reconnect = controller(&target, prompter.clone());

        for _ in 0..7 {
            reconnect.schedule_reconnect();
        }
        settle().await;

        assert_eq!(
            prompter.prompts(),
            vec![Prompt::DisableAfterRetries {
                connection: "remote-1".to_string()
            }]
        );
        assert_eq!(target.disabled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_target_disarms_the_controller() {
        let target = FakeTarget::new(ConnectionState::NetworkError);
        let reconnect = controller(&target, FakePrompter::new());
        drop(target);
        assert_eq!(reconnect.schedule_reconnect(), None);
        assert!(!reconnect.has_pending_timer());
    }
}
