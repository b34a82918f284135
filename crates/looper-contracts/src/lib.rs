//! Contracts shared by the loop engine and its front-ends: control signals,
//! the controller command syntax, and the on-disk run journal.

pub mod control;
pub mod events;
pub mod runs;
