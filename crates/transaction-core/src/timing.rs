//! RFC 3261 base timers and their derived durations.
//!
//! T1 estimates the round-trip time, T2 caps retransmission intervals for
//! non-INVITE requests and INVITE responses, T4 bounds how long a message
//! stays in the network. All transaction timers derive from these
//! ([RFC 3261 Appendix A](https://datatracker.ietf.org/doc/html/rfc3261#appendix-A)).

use std::sync::OnceLock;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Timing configuration snapshot carried by every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    /// RTT estimate, default 500 ms
    pub t1: Duration,
    /// Retransmission interval cap, default 4 s
    pub t2: Duration,
    /// Maximum message lifetime in the network, default 5 s
    pub t4: Duration,
    /// Grace period before an INVITE server transaction answers
    /// `100 Trying` on its own, default 200 ms
    pub time_100: Duration,
    /// Wait for response retransmissions in the INVITE client Completed
    /// state, at least 32 s on unreliable transports
    pub time_d: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            time_100: Duration::from_millis(200),
            time_d: Duration::from_secs(32),
        }
    }
}

impl Timings {
    /// 64*T1: the absolute timeout used by Timers B, F, H, J and L.
    pub fn timeout(&self) -> Duration {
        self.t1 * 64
    }

    /// The process-wide defaults, initialized at first use.
    pub fn global() -> Timings {
        static GLOBAL: OnceLock<Timings> = OnceLock::new();
        *GLOBAL.get_or_init(Timings::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_timeout() {
        let timings = Timings::default();
        assert_eq!(timings.timeout(), Duration::from_secs(32));
        let fast = Timings {
            t1: Duration::from_millis(10),
            ..Timings::default()
        };
        assert_eq!(fast.timeout(), Duration::from_millis(640));
    }
}
