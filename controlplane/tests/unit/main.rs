//! Control plane unit tests

mod support;

mod test_containers;
mod test_events;
mod test_server;
mod test_webhooks;
