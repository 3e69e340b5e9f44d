//! Layered Policy Cache (component B): domain allow/deny decisions and
//! host-command pattern classification, both composed from static
//! config plus machine-written approvals and lazily cached per project.

pub mod cache;
pub mod command;

pub use cache::{Decision, PolicyCache};
pub use command::{CommandMatcher, PatternClass};
