//! Persistent state layout

pub mod layout;
