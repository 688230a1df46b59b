//! tally: vote tally polling and broadcast engine
//!
//! Reads an aggregate vote count from one of several backing stores on a fixed
//! cadence and fans the normalized result out to every connected viewer.

pub mod backend;
pub mod error;
pub mod establish;
pub mod hub;
pub mod metrics;
pub mod poller;
pub mod tally;
pub mod test_helpers;

pub use backend::{Backend, ManagedBackend, PostgresBackend, RestBackend, TallyQuery};
pub use error::{BackendError, EstablishError};
pub use establish::{Establisher, LinkState, RetryPolicy};
pub use hub::{Hub, ServerEvent, SessionId};
pub use poller::{PollStats, Poller};
pub use tally::{normalize, RawResult, RawRow, Tally};
