mod test_config;
mod test_queue;
mod test_receiver;
mod test_server;
