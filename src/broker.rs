use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions, QueueDeleteOptions,
    },
    types::FieldTable,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use crate::rpc::RpcError;

// 1. Broker Contract

/// PublishProperties
///
/// The AMQP message properties the RPC convention relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishProperties {
    pub content_type: String,
    pub content_encoding: String,
    pub correlation_id: String,
    pub reply_to: String,
}

/// Delivery
///
/// A message read from a queue. Only the fields reply correlation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, RpcError>>;

/// Broker
///
/// Entry point to a message broker: knows how to establish a connection.
/// `AmqpBroker` talks to RabbitMQ; `MockBroker` is an in-memory stand-in for tests.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, RpcError>;
}

/// BrokerConnection
///
/// A long-lived connection that multiplexes short-lived channels.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, RpcError>;
    async fn close(&self) -> Result<(), RpcError>;
}

/// BrokerChannel
///
/// The subset of AMQP channel operations used by the RPC client.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a durable topic exchange (idempotent).
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), RpcError>;
    /// Declares an exclusive, auto-delete, server-named queue and returns its name.
    async fn declare_reply_queue(&self) -> Result<String, RpcError>;
    /// Exclusive queues outlive their channel; only this or closing the
    /// connection removes them.
    async fn delete_queue(&self, queue: &str) -> Result<(), RpcError>;
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), RpcError>;
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), RpcError>;
    /// Starts a no-ack consumer on `queue`.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RpcError>;
    async fn close(&self) -> Result<(), RpcError>;
}

// 2. The Real Implementation (RabbitMQ via lapin)

/// AmqpBroker
///
/// Connects to an AMQP 0.9.1 broker (RabbitMQ / CloudAMQP) with `lapin`.
#[derive(Clone)]
pub struct AmqpBroker {
    url: String,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, RpcError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))?;
        tracing::info!("Connected to AMQP broker");
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, RpcError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| RpcError::Channel(e.to_string()))?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), RpcError> {
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| RpcError::Connection(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), RpcError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(exchange, ExchangeKind::Topic, options, FieldTable::default())
            .await
            .map_err(|e| RpcError::Channel(e.to_string()))
    }

    async fn declare_reply_queue(&self) -> Result<String, RpcError> {
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(|e| RpcError::Channel(e.to_string()))?;
        Ok(queue.name().as_str().to_string())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), RpcError> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map(|_message_count| ())
            .map_err(|e| RpcError::Channel(e.to_string()))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), RpcError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Channel(e.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), RpcError> {
        let amqp_properties = BasicProperties::default()
            .with_content_type(properties.content_type.into())
            .with_content_encoding(properties.content_encoding.into())
            .with_correlation_id(properties.correlation_id.into())
            .with_reply_to(properties.reply_to.into());

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                amqp_properties,
            )
            .await
            .map_err(|e| RpcError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RpcError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(|e| RpcError::Consume(e.to_string()))?;

        let deliveries = consumer.map(|item| {
            item.map(|delivery| Delivery {
                correlation_id: delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                body: delivery.data,
            })
            .map_err(|e| RpcError::Consume(e.to_string()))
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), RpcError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|e| RpcError::Channel(e.to_string()))
    }
}

// 3. The Mock Implementation (For Tests)

/// PublishedMessage
///
/// Everything the mock broker saw for one publish, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: PublishProperties,
}

impl PublishedMessage {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// A scripted remote service: given a request, the replies to publish back as
/// `(correlation_id, body)` pairs. Replies are routed by `reply_to` through the
/// exchange bindings, exactly as a nameko worker would.
pub type Responder = Arc<dyn Fn(&PublishedMessage) -> Vec<(Option<String>, Vec<u8>)> + Send + Sync>;

/// ConsumeFault
///
/// Ways the mock can break the reply side of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeFault {
    /// `basic.consume` itself is refused.
    Refuse,
    /// The consumer yields an error instead of a delivery.
    StreamError,
    /// The consumer ends without delivering anything.
    StreamEnds,
}

#[derive(Default)]
struct MockState {
    exchanges: HashSet<String>,
    // routing key -> queue name, per exchange
    bindings: HashMap<(String, String), String>,
    queues: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    responders: HashMap<String, Responder>,
    published: Vec<PublishedMessage>,
    connects: usize,
    connection_closed: bool,
    // set by `sever_connection`, cleared by the next `connect`
    connection_lost: bool,
    open_channels: usize,
    peak_open_channels: usize,
    next_queue: u64,
}

/// MockBroker
///
/// In-memory topic exchange used by the RPC and handler tests. Publishing to a
/// routing key with a registered responder synchronously routes the responder's
/// replies into the bound reply queue.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
    /// When true, `connect` fails as if the broker were unreachable.
    pub fail_connect: bool,
    pub consume_fault: Option<ConsumeFault>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn with_consume_fault(fault: ConsumeFault) -> Self {
        Self {
            consume_fault: Some(fault),
            ..Self::default()
        }
    }

    /// Simulates the broker dropping the current connection: channel creation
    /// fails until a new connection is made.
    pub fn sever_connection(&self) {
        self.lock().connection_lost = true;
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a raw responder for `routing_key`.
    pub fn on_publish<F>(&self, routing_key: &str, responder: F)
    where
        F: Fn(&PublishedMessage) -> Vec<(Option<String>, Vec<u8>)> + Send + Sync + 'static,
    {
        self.lock()
            .responders
            .insert(routing_key.to_string(), Arc::new(responder));
    }

    /// Registers a responder that answers every request with `reply`,
    /// echoing the request's correlation id.
    pub fn reply_with(&self, routing_key: &str, reply: serde_json::Value) {
        let body = reply.to_string().into_bytes();
        self.on_publish(routing_key, move |request| {
            vec![(Some(request.properties.correlation_id.clone()), body.clone())]
        });
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn open_channels(&self) -> usize {
        self.lock().open_channels
    }

    pub fn peak_open_channels(&self) -> usize {
        self.lock().peak_open_channels
    }

    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn connection_closed(&self) -> bool {
        self.lock().connection_closed
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, RpcError> {
        if self.fail_connect {
            return Err(RpcError::Connection("Mock Broker: connection refused".to_string()));
        }
        let mut state = self.lock();
        state.connects += 1;
        state.connection_lost = false;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrokerConnection for MockBroker {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, RpcError> {
        let mut state = self.lock();
        if state.connection_closed {
            return Err(RpcError::Channel("Mock Broker: connection closed".to_string()));
        }
        if state.connection_lost {
            return Err(RpcError::Channel("Mock Broker: connection reset by peer".to_string()));
        }
        state.open_channels += 1;
        state.peak_open_channels = state.peak_open_channels.max(state.open_channels);
        drop(state);

        Ok(Box::new(MockChannel {
            broker: self.clone(),
            receivers: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
        }))
    }

    async fn close(&self) -> Result<(), RpcError> {
        let mut state = self.lock();
        state.connection_closed = true;
        // Exclusive queues go away with their connection.
        state.queues.clear();
        state.bindings.clear();
        Ok(())
    }
}

struct MockChannel {
    broker: MockBroker,
    receivers: Mutex<HashMap<String, mpsc::UnboundedReceiver<Delivery>>>,
    closed: Mutex<bool>,
}

fn lock_local<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_topic_exchange(&self, exchange: &str) -> Result<(), RpcError> {
        self.broker.lock().exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<String, RpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = {
            let mut state = self.broker.lock();
            state.next_queue += 1;
            let name = format!("amq.gen-mock-{}", state.next_queue);
            state.queues.insert(name.clone(), tx);
            name
        };
        lock_local(&self.receivers).insert(name.clone(), rx);
        Ok(name)
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), RpcError> {
        lock_local(&self.receivers).remove(queue);
        let mut state = self.broker.lock();
        if state.queues.remove(queue).is_none() {
            return Err(RpcError::Channel(format!("Mock Broker: no queue '{}'", queue)));
        }
        state.bindings.retain(|_, bound| bound != queue);
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), RpcError> {
        let mut state = self.broker.lock();
        if !state.exchanges.contains(exchange) {
            return Err(RpcError::Channel(format!("Mock Broker: no exchange '{}'", exchange)));
        }
        if !state.queues.contains_key(queue) {
            return Err(RpcError::Channel(format!("Mock Broker: no queue '{}'", queue)));
        }
        state
            .bindings
            .insert((exchange.to_string(), routing_key.to_string()), queue.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: PublishProperties,
    ) -> Result<(), RpcError> {
        let mut state = self.broker.lock();
        if !state.exchanges.contains(exchange) {
            return Err(RpcError::Publish(format!("Mock Broker: no exchange '{}'", exchange)));
        }
        let message = PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            properties,
        };
        state.published.push(message.clone());

        let Some(responder) = state.responders.get(routing_key).cloned() else {
            // Unroutable on a topic exchange: silently dropped.
            return Ok(());
        };
        let replies = responder(&message);

        let binding = (exchange.to_string(), message.properties.reply_to.clone());
        if let Some(sender) = state
            .bindings
            .get(&binding)
            .and_then(|queue| state.queues.get(queue))
        {
            for (correlation_id, body) in replies {
                let _ = sender.send(Delivery { correlation_id, body });
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RpcError> {
        match self.broker.consume_fault {
            Some(ConsumeFault::Refuse) => {
                return Err(RpcError::Consume("Mock Broker: consumer refused".to_string()));
            }
            Some(ConsumeFault::StreamError) => {
                let failure = RpcError::Consume("Mock Broker: consumer cancelled".to_string());
                return Ok(stream::once(async move { Err(failure) }).boxed());
            }
            Some(ConsumeFault::StreamEnds) => return Ok(stream::empty().boxed()),
            None => {}
        }

        let receiver = lock_local(&self.receivers)
            .remove(queue)
            .ok_or_else(|| RpcError::Consume(format!("Mock Broker: queue '{}' not consumable", queue)))?;

        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (Ok(delivery), receiver))
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), RpcError> {
        {
            let mut closed = lock_local(&self.closed);
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        // Queues declared here stay on the broker until deleted.
        let mut state = self.broker.lock();
        state.open_channels = state.open_channels.saturating_sub(1);
        Ok(())
    }
}
