//! # sipflow-transaction-core
//!
//! The transaction layer of the sipflow stack: the four state machines of
//! [RFC 3261 Section 17](https://datatracker.ietf.org/doc/html/rfc3261#section-17)
//! (with the RFC 6026 Accepted state), their retransmission and timeout
//! timers, the key-based matching engine, a sharded transaction store and
//! JSON snapshots for warm restart.
//!
//! The layer plugs between a `sipflow-sip-transport` event stream and the
//! application: [`TransactionLayer::request_middleware`] and
//! [`TransactionLayer::response_middleware`] wrap application handlers so
//! that matched messages drive their machines and only unmatched ones
//! reach the application.

pub mod error;
pub mod key;
pub mod layer;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod timer;
pub mod timing;
pub mod transaction;

pub use error::{Error, Result};
pub use key::{client_key, response_key, server_key, TransactionKey};
pub use layer::{
    ClientTransaction, RequestHandler, ResponseHandler, ServerTransaction, TransactionLayer,
};
pub use registry::CallbackRegistry;
pub use snapshot::TransactionSnapshot;
pub use store::TransactionStore;
pub use timer::{TimerKind, TimerSnapshot};
pub use timing::Timings;
pub use transaction::invite_client::InviteClientTransaction;
pub use transaction::invite_server::InviteServerTransaction;
pub use transaction::non_invite_client::NonInviteClientTransaction;
pub use transaction::non_invite_server::NonInviteServerTransaction;
pub use transaction::{TransactionKind, TransactionState};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::key::{client_key, response_key, server_key, TransactionKey};
    pub use crate::layer::{
        ClientTransaction, RequestHandler, ResponseHandler, ServerTransaction, TransactionLayer,
    };
    pub use crate::snapshot::TransactionSnapshot;
    pub use crate::timer::TimerKind;
    pub use crate::timing::Timings;
    pub use crate::transaction::invite_client::InviteClientTransaction;
    pub use crate::transaction::invite_server::InviteServerTransaction;
    pub use crate::transaction::non_invite_client::NonInviteClientTransaction;
    pub use crate::transaction::non_invite_server::NonInviteServerTransaction;
    pub use crate::transaction::{TransactionKind, TransactionState};
}
