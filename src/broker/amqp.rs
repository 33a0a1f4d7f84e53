//! AMQP 0-9-1 broker over `amiquip` (blocking).

use amiquip::{
    AmqpProperties, Channel, Connection, ExchangeDeclareOptions, ExchangeType, FieldTable,
    Publish, QueueDeclareOptions,
};

use crate::broker::{Broker, Connector, PublishTarget};
use crate::config::BrokerConfig;
use crate::error::{Mail2RmqError, Result};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Opens one AMQP connection per publish target.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    config: BrokerConfig,
}

impl AmqpConnector {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

impl Connector for AmqpConnector {
    fn broker(&self, target: &PublishTarget) -> Box<dyn Broker> {
        Box::new(AmqpBroker::new(self.config.clone(), target.clone()))
    }
}

/// A single connection/channel pair bound to one queue.
pub struct AmqpBroker {
    config: BrokerConfig,
    target: PublishTarget,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl AmqpBroker {
    pub fn new(config: BrokerConfig, target: PublishTarget) -> Self {
        Self {
            config,
            target,
            connection: None,
            channel: None,
        }
    }

    fn url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}",
            self.config.user, self.config.password, self.config.host, self.config.port
        )
    }

    fn exchange_type(&self) -> ExchangeType {
        match self.config.exchange_type.to_ascii_lowercase().as_str() {
            "direct" => ExchangeType::Direct,
            "fanout" => ExchangeType::Fanout,
            "topic" => ExchangeType::Topic,
            "headers" => ExchangeType::Headers,
            other => ExchangeType::Custom(other.to_string()),
        }
    }

    /// Declare the exchange and queue, then bind them with the routing key.
    fn declare(&self, channel: &Channel) -> Result<()> {
        let exchange = channel
            .exchange_declare(
                self.exchange_type(),
                self.target.exchange.as_str(),
                ExchangeDeclareOptions {
                    durable: self.config.exchange_durable,
                    ..ExchangeDeclareOptions::default()
                },
            )
            .map_err(|e| Mail2RmqError::Connection(format!("exchange declare: {e}")))?;

        let queue = channel
            .queue_declare(
                self.target.queue.as_str(),
                QueueDeclareOptions {
                    durable: self.config.queue_durable,
                    auto_delete: self.config.auto_delete,
                    ..QueueDeclareOptions::default()
                },
            )
            .map_err(|e| Mail2RmqError::Connection(format!("queue declare: {e}")))?;

        queue
            .bind(&exchange, self.target.routing_key.as_str(), FieldTable::new())
            .map_err(|e| Mail2RmqError::Connection(format!("queue bind: {e}")))
    }
}

impl Broker for AmqpBroker {
    fn connect(&mut self) -> Result<()> {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            exchange = %self.target.exchange,
            "Connecting to broker"
        );

        let mut connection = Connection::insecure_open(&self.url())
            .map_err(|e| Mail2RmqError::Connection(e.to_string()))?;

        let channel = match connection.open_channel(None) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close();
                return Err(Mail2RmqError::Connection(format!("open channel: {e}")));
            }
        };

        // Keep both handles so `close` releases them even if declare fails.
        let declared = self.declare(&channel);
        self.connection = Some(connection);
        self.channel = Some(channel);
        declared
    }

    fn is_channel_open(&self) -> bool {
        self.channel.is_some()
    }

    fn publish(&mut self, body: &str) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(Mail2RmqError::ChannelClosed)?;
        channel
            .basic_publish(
                self.target.exchange.as_str(),
                Publish::with_properties(
                    body.as_bytes(),
                    self.target.routing_key.as_str(),
                    AmqpProperties::default().with_delivery_mode(PERSISTENT),
                ),
            )
            .map_err(|e| Mail2RmqError::Publish(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close() {
                tracing::debug!(error = %e, "Channel close failed");
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                tracing::debug!(error = %e, "Connection close failed");
            }
        }
    }
}

impl Drop for AmqpBroker {
    fn drop(&mut self) {
        self.close();
    }
}
