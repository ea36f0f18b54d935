//! # Transaction snapshots
//!
//! A snapshot captures everything needed to rebuild a transaction after a
//! process restart: type, state, key, the original request and last
//! response as rendered SIP text, the send options, the timing
//! configuration and a `(duration, deadline)` pair per live timer. The
//! JSON layout is stable; timers whose deadline has passed by restore
//! time are simply not re-armed.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use sipflow_sip_core::{parse_message, Message, Request, Response};
use sipflow_sip_transport::SendOptions;

use crate::error::{Error, Result};
use crate::key::TransactionKey;
use crate::timer::{TimerKind, TimerSnapshot};
use crate::timing::Timings;
use crate::transaction::{TransactionCore, TransactionKind, TransactionState};

/// Persistent image of one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    /// Transaction family
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// State at capture time
    pub state: TransactionState,
    /// Matching key
    pub key: TransactionKey,
    /// Original request, rendered
    pub request: String,
    /// Last response sent or received, rendered
    pub last_response: Option<String>,
    /// Where the transaction sends
    pub send_options: SendOptions,
    /// Timing configuration the transaction runs with
    pub timings: Timings,
    /// Live timers at capture time, keyed by timer name
    pub timers: BTreeMap<String, TimerSnapshot>,
}

impl TransactionSnapshot {
    pub(crate) fn capture(core: &TransactionCore) -> Self {
        TransactionSnapshot {
            kind: core.kind,
            state: core.state(),
            key: core.key.clone(),
            request: String::from_utf8_lossy(&core.origin.to_bytes()).into_owned(),
            last_response: core
                .last_response_message()
                .map(|response| String::from_utf8_lossy(&response.to_bytes()).into_owned()),
            send_options: core.options.clone(),
            timings: core.timings,
            timers: core.timers.lock().snapshot(),
        }
    }

    /// Serializes to the stable JSON layout.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Snapshot(e.to_string()))
    }

    /// Deserializes a snapshot.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Snapshot(e.to_string()))
    }

    pub(crate) fn parse_request(&self) -> Result<Request> {
        match parse_message(self.request.as_bytes()).map_err(Error::Core)? {
            Message::Request(request) => Ok(request),
            Message::Response(_) => Err(Error::Snapshot(
                "snapshot request field holds a response".to_string(),
            )),
        }
    }

    pub(crate) fn parse_last_response(&self) -> Result<Option<Response>> {
        match &self.last_response {
            None => Ok(None),
            Some(text) => match parse_message(text.as_bytes()).map_err(Error::Core)? {
                Message::Response(response) => Ok(Some(response)),
                Message::Request(_) => Err(Error::Snapshot(
                    "snapshot last_response field holds a request".to_string(),
                )),
            },
        }
    }

    /// Timers still in the future, with their remaining durations.
    pub(crate) fn remaining_timers(&self) -> Vec<(TimerKind, Duration)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;
        self.timers
            .iter()
            .filter_map(|(name, timer)| {
                let kind = TimerKind::from_name(name)?;
                if timer.deadline_ns > now {
                    Some((kind, Duration::from_nanos(timer.deadline_ns - now)))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_layout_is_stable() {
        let json = r#"{
            "type": "invite_server",
            "state": "completed",
            "key": {"Server": {"branch": "z9hG4bKx", "sent_by": "a.example.com:5060", "method": "Invite"}},
            "request": "INVITE sip:b@x.com SIP/2.0\r\nVia: SIP/2.0/UDP a.example.com:5060;branch=z9hG4bKx\r\nFrom: <sip:a@x.com>;tag=1\r\nTo: <sip:b@x.com>\r\nCall-ID: c1\r\nCSeq: 1 INVITE\r\nMax-Forwards: 70\r\n\r\n",
            "last_response": null,
            "send_options": {"protocol": "Udp", "local_addr": null, "remote_addr": "10.0.0.1:5060", "no_dial": false},
            "timings": {"t1": {"secs": 0, "nanos": 500000000}, "t2": {"secs": 4, "nanos": 0}, "t4": {"secs": 5, "nanos": 0}, "time_100": {"secs": 0, "nanos": 200000000}, "time_d": {"secs": 32, "nanos": 0}},
            "timers": {"H": {"duration_ns": 32000000000, "deadline_ns": 1}}
        }"#;
        let snapshot = TransactionSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.kind, TransactionKind::InviteServer);
        assert_eq!(snapshot.state, TransactionState::Completed);
        let request = snapshot.parse_request().unwrap();
        assert_eq!(request.headers.call_id().unwrap().value(), "c1");
        // Deadline long past: nothing to re-arm.
        assert!(snapshot.remaining_timers().is_empty());

        let round = TransactionSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(round.key, snapshot.key);
        assert_eq!(round.timers, snapshot.timers);
    }
}
