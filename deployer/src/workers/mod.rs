//! Background workers

pub mod deployer;
pub mod pipeline;
pub mod reaper;
