//! Core type definitions used across the SpaceLink workspace.

pub mod id;

pub use id::*;
