//! Message broker abstraction.
//!
//! The dispatch engine talks to the broker only through [`Connector`] and
//! [`Broker`]. [`amqp::AmqpConnector`] is the production implementation.

pub mod amqp;

use crate::error::Result;

/// Where one routing decision is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl PublishTarget {
    pub fn new(exchange: &str, queue: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        }
    }
}

/// One connection and channel bound to a single [`PublishTarget`].
pub trait Broker {
    /// Open the connection and channel, declaring and binding the target.
    fn connect(&mut self) -> Result<()>;

    /// `true` once `connect` succeeded and until `close`.
    fn is_channel_open(&self) -> bool;

    /// Publish one persistent message to the target.
    fn publish(&mut self, body: &str) -> Result<()>;

    /// Close the channel and connection. Safe to call when not connected.
    fn close(&mut self);
}

/// Builds a fresh [`Broker`] per dispatch attempt.
pub trait Connector {
    fn broker(&self, target: &PublishTarget) -> Box<dyn Broker>;
}
