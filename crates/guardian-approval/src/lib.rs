//! Approval queues, event hub, and scope persistence (component C).
//!
//! [`DomainQueue`] and [`CommandQueue`] hold requests waiting on a human
//! decision from the Approval UI, coalescing repeat requests for the
//! same host or command line. [`EventHub`] fans state changes out to SSE
//! subscribers. [`persist::apply_domain_decision`] is the single place a
//! resolved domain decision turns into a disk write and policy cache
//! refresh.

pub mod command_queue;
pub mod domain_queue;
pub mod hub;
pub mod persist;

pub use command_queue::{fingerprint, CommandOutcome, CommandQueue, CommandRequest};
pub use domain_queue::{DomainOutcome, DomainQueue, DomainRequest};
pub use hub::{EventHub, GuardianEvent};
pub use persist::{apply_domain_decision, wildcard_suffix};
