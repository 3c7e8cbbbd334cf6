//! # Event Bus System
//!
//! Typed broadcast events for source resolution and cache maintenance, built
//! on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`SourceEvent`] for open/download lifecycle and
//!   [`CacheEvent`] for eviction and clears, wrapped by [`CoreEvent`]
//! - **EventBus**: central broadcast channel
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! Progress events are observational only. A subscriber that falls behind
//! receives `RecvError::Lagged` and simply picks up at the newest state.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SourceEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Source(SourceEvent::Opened {
//!     source_id: "https://host/a.mp3".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.try_recv(), Ok(CoreEvent::Source(_))));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Open, download and listing lifecycle
    Source(SourceEvent),
    /// Cache maintenance
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Source(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Source(SourceEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Source(SourceEvent::AuthRequired { .. }) => EventSeverity::Warning,
            CoreEvent::Source(SourceEvent::Opened { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Cleared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Source Events
// ============================================================================

/// Stage of a remote load as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadPhase {
    Connecting,
    Downloading,
    Opening,
}

/// Snapshot of a remote load for progress display.
///
/// Recomputed from the transfer loop on every emission; never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLoadUiState {
    pub source_id: String,
    pub phase: LoadPhase,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_second: Option<u64>,
    /// 0.0 to 100.0 when the total is known
    pub percent: Option<f32>,
    /// True when no total is known and the UI should show a spinner
    pub indeterminate: bool,
}

impl RemoteLoadUiState {
    /// State for a phase with no byte counts yet.
    pub fn phase(source_id: impl Into<String>, phase: LoadPhase) -> Self {
        Self {
            source_id: source_id.into(),
            phase,
            downloaded_bytes: 0,
            total_bytes: None,
            bytes_per_second: None,
            percent: None,
            indeterminate: true,
        }
    }

    /// Downloading state derived from byte counts and elapsed time.
    pub fn downloading(
        source_id: impl Into<String>,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        elapsed_ms: u64,
    ) -> Self {
        let total_bytes = total_bytes.filter(|t| *t > 0);
        let percent = total_bytes
            .map(|total| ((downloaded_bytes as f64 / total as f64) * 100.0).min(100.0) as f32);
        let bytes_per_second = if elapsed_ms > 0 {
            Some(downloaded_bytes.saturating_mul(1000) / elapsed_ms)
        } else {
            None
        };

        Self {
            source_id: source_id.into(),
            phase: LoadPhase::Downloading,
            downloaded_bytes,
            total_bytes,
            bytes_per_second,
            percent,
            indeterminate: total_bytes.is_none(),
        }
    }

    /// Whether this snapshot reports a finished transfer.
    pub fn is_complete(&self) -> bool {
        matches!(self.percent, Some(p) if p >= 100.0)
    }
}

/// Which cache a maintenance event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheDomain {
    Archive,
    Remote,
}

/// Lifecycle of one open request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SourceEvent {
    LoadProgress(RemoteLoadUiState),
    Opened {
        source_id: String,
    },
    /// The server rejected the attempt; `scope` is the host or host/share the
    /// credentials will be remembered for.
    AuthRequired {
        source_id: String,
        scope: String,
    },
    Failed {
        source_id: String,
        reason: String,
        kind: String,
    },
    Cancelled {
        source_id: String,
    },
}

impl SourceEvent {
    fn description(&self) -> &str {
        match self {
            SourceEvent::LoadProgress(_) => "Source load progress",
            SourceEvent::Opened { .. } => "Source opened",
            SourceEvent::AuthRequired { .. } => "Source requires credentials",
            SourceEvent::Failed { .. } => "Source failed to open",
            SourceEvent::Cancelled { .. } => "Source open cancelled",
        }
    }
}

/// Cache maintenance results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    Evicted {
        domain: CacheDomain,
        removed: usize,
        freed_bytes: u64,
    },
    Cleared {
        domain: CacheDomain,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cache entries evicted",
            CacheEvent::Cleared { .. } => "Cache cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel.
///
/// Cloning shares the underlying channel. Emitting with no subscribers is
/// not an error for callers; they generally ignore the `SendError`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus; `capacity` bounds how far a subscriber may lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event, returning the number of receivers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let cache_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
