//! Deployer Library
//!
//! Accepts authenticated deployment triggers, queues them durably per target
//! and rolls container images out through a pool of workers.

pub mod app;
pub mod config;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod notify;
pub mod queue;
pub mod receiver;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
