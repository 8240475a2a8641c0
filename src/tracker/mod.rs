//! Active-tab time accounting. [state::SessionTracker] is the state machine deciding which site
//! is being timed, [service::TrackerService] drives it from activity events, requests and timers.
//! Seconds are credited to an in-memory pending buffer and merged into day buckets on flush.

pub mod bus;
pub mod events;
pub mod service;
pub mod session;
pub mod state;
