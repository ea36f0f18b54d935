//! # Transaction timers
//!
//! Each timer is a named `(duration, deadline, task)` triple. The task
//! sleeps and then fires the owning transaction through a weak reference,
//! so a dropped transaction silently disarms its timers; a fired callback
//! re-checks the transaction state under the FSM lock, so a timer that
//! lost the race against a state change is a no-op.
//!
//! Both deadlines are tracked: the monotonic one drives the task, the wall
//! clock one is persisted into snapshots so a restore can re-arm timers
//! with their remaining duration.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

/// The timers of RFC 3261 Section 17, plus the provisional-response grace
/// timer of an INVITE server transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Auto-`100 Trying` grace period (INVITE server)
    Time100,
    /// INVITE request retransmission
    A,
    /// INVITE client timeout
    B,
    /// Wait for response retransmissions (INVITE client, Completed)
    D,
    /// Non-INVITE request retransmission
    E,
    /// Non-INVITE client timeout
    F,
    /// Final response retransmission (INVITE server, Completed)
    G,
    /// ACK timeout (INVITE server, Completed)
    H,
    /// Wait for ACK retransmissions (INVITE server, Confirmed)
    I,
    /// Non-INVITE server linger in Completed
    J,
    /// Wait for response retransmissions (non-INVITE client, Completed)
    K,
    /// Wait for 2xx retransmissions (INVITE server, Accepted, RFC 6026)
    L,
}

impl TimerKind {
    /// Stable name used as the snapshot map key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Time100 => "100",
            TimerKind::A => "A",
            TimerKind::B => "B",
            TimerKind::D => "D",
            TimerKind::E => "E",
            TimerKind::F => "F",
            TimerKind::G => "G",
            TimerKind::H => "H",
            TimerKind::I => "I",
            TimerKind::J => "J",
            TimerKind::K => "K",
            TimerKind::L => "L",
        }
    }

    /// Inverse of [`as_str`](TimerKind::as_str).
    pub fn from_name(name: &str) -> Option<TimerKind> {
        Some(match name {
            "100" => TimerKind::Time100,
            "A" => TimerKind::A,
            "B" => TimerKind::B,
            "D" => TimerKind::D,
            "E" => TimerKind::E,
            "F" => TimerKind::F,
            "G" => TimerKind::G,
            "H" => TimerKind::H,
            "I" => TimerKind::I,
            "J" => TimerKind::J,
            "K" => TimerKind::K,
            "L" => TimerKind::L,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of timer expirations.
#[async_trait]
pub(crate) trait TimerTarget: Send + Sync {
    async fn on_timer(&self, kind: TimerKind);
}

struct TimerEntry {
    duration: Duration,
    deadline: SystemTime,
    handle: JoinHandle<()>,
}

impl Drop for TimerEntry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Persisted state of one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Originally armed duration
    pub duration_ns: u64,
    /// Absolute deadline, nanoseconds since the Unix epoch
    pub deadline_ns: u64,
}

/// The live timers of one transaction.
#[derive(Default)]
pub(crate) struct TimerTable {
    entries: HashMap<TimerKind, TimerEntry>,
}

impl TimerTable {
    /// Currently armed duration of a timer, used for retransmission
    /// interval doubling.
    pub(crate) fn duration(&self, kind: TimerKind) -> Option<Duration> {
        self.entries.get(&kind).map(|entry| entry.duration)
    }

    /// Stops one timer. Idempotent.
    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        self.entries.remove(&kind);
    }

    /// Stops every timer.
    pub(crate) fn cancel_all(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of all live timers, keyed by timer name.
    pub(crate) fn snapshot(&self) -> std::collections::BTreeMap<String, TimerSnapshot> {
        self.entries
            .iter()
            .map(|(kind, entry)| {
                (
                    kind.as_str().to_string(),
                    TimerSnapshot {
                        duration_ns: entry.duration.as_nanos() as u64,
                        deadline_ns: entry
                            .deadline
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or(Duration::ZERO)
                            .as_nanos() as u64,
                    },
                )
            })
            .collect()
    }

    fn insert(&mut self, kind: TimerKind, duration: Duration, handle: JoinHandle<()>) {
        // Replacing a timer aborts the previous task via Drop.
        self.entries.insert(
            kind,
            TimerEntry {
                duration,
                deadline: SystemTime::now() + duration,
                handle,
            },
        );
    }
}

/// Arms a timer against a target. The task holds only a weak reference so
/// timers never keep a terminated transaction alive.
pub(crate) fn schedule<T>(target: &Arc<T>, table: &mut TimerTable, kind: TimerKind, duration: Duration)
where
    T: TimerTarget + 'static,
{
    let weak: Weak<T> = Arc::downgrade(target);
    let handle = tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        if let Some(target) = weak.upgrade() {
            target.on_timer(kind).await;
        }
    });
    table.insert(kind, duration, handle);
}
