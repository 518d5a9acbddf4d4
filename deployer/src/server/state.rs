//! Server state

use std::sync::Arc;

use crate::config::Config;
use crate::queue::JobQueue;
use crate::receiver::Receiver;

/// Server state shared across handlers
pub struct ServerState {
    pub config: Arc<Config>,
    pub queue: Arc<JobQueue>,
    pub receiver: Arc<Receiver>,
}

impl ServerState {
    pub fn new(config: Arc<Config>, queue: Arc<JobQueue>, receiver: Arc<Receiver>) -> Self {
        Self {
            config,
            queue,
            receiver,
        }
    }
}
