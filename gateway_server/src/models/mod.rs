//! Records kept in the flat JSON data files.

pub mod event;
pub mod generation;
pub mod user;
