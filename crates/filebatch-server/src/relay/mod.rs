//! Message relay: an HTTP producer and a logging consumer joined by a broker topic

pub mod broker;
pub mod consumer;
pub mod routes;

pub use broker::Broker;
pub use routes::relay_routes;
