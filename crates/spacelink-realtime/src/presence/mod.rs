//! Participant presence and cursor tracking.

pub mod tracker;

pub use tracker::PresenceTracker;
