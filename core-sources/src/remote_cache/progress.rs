//! Download progress reporting.

use core_runtime::config::ProgressThrottle;
use core_runtime::events::{LoadPhase, RemoteLoadUiState};
use tokio::time::Instant;

/// Status callback events. Every download ends with exactly one of
/// `Finished`, `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Progress(RemoteLoadUiState),
    Finished(RemoteLoadUiState),
    Failed { source_id: String, reason: String },
    Cancelled { source_id: String },
}

/// Callback receiving [`LoadEvent`]s.
pub type LoadObserver<'a> = &'a (dyn Fn(LoadEvent) + Send + Sync);

/// Observer that drops everything.
pub fn ignore_progress(_: LoadEvent) {}

/// Emits a progress snapshot only once both the interval and the byte delta
/// since the last emission have been reached.
pub(crate) struct ProgressGate {
    throttle: ProgressThrottle,
    started: Instant,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressGate {
    pub(crate) fn new(throttle: ProgressThrottle) -> Self {
        let now = Instant::now();
        Self {
            throttle,
            started: now,
            last_emit: now,
            last_bytes: 0,
        }
    }

    pub(crate) fn should_emit(&mut self, downloaded: u64) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_emit) < self.throttle.min_interval
            || downloaded.saturating_sub(self.last_bytes) < self.throttle.min_bytes
        {
            return false;
        }
        self.last_emit = now;
        self.last_bytes = downloaded;
        true
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub(crate) fn connecting(source_id: &str) -> LoadEvent {
    LoadEvent::Progress(RemoteLoadUiState::phase(source_id, LoadPhase::Connecting))
}

pub(crate) fn finished(source_id: &str, size: u64, elapsed_ms: u64) -> LoadEvent {
    LoadEvent::Finished(RemoteLoadUiState::downloading(
        source_id,
        size,
        Some(size),
        elapsed_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_gate_requires_time_and_bytes() {
        let mut gate = ProgressGate::new(ProgressThrottle {
            min_interval: Duration::from_millis(200),
            min_bytes: 1000,
        });

        assert!(!gate.should_emit(5000));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(!gate.should_emit(500));
        assert!(gate.should_emit(1500));
        assert!(!gate.should_emit(9000));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(!gate.should_emit(2000));
        assert!(gate.should_emit(2500));
    }

    #[test]
    fn test_finished_is_complete() {
        match finished("a", 10, 5) {
            LoadEvent::Finished(state) => assert!(state.is_complete()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
