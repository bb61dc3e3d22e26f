//! Request/reply over a topic exchange, following the nameko RPC convention.
//!
//! A call publishes `{"args": [...], "kwargs": {}}` to the `nameko-rpc` exchange with
//! routing key `<service>.<method>`, then waits on a private reply queue for the
//! message carrying the same correlation id.

use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{Broker, BrokerChannel, BrokerConnection, PublishProperties};

pub const RPC_EXCHANGE: &str = "nameko-rpc";
pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "utf-8";

/// RpcError
///
/// Every way a call can end without a reply.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid rpc target: {0}")]
    InvalidTarget(String),
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker channel error: {0}")]
    Channel(String),
    #[error("failed to publish rpc request: {0}")]
    Publish(String),
    #[error("error while consuming rpc replies: {0}")]
    Consume(String),
    #[error("rpc payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc call cancelled")]
    Cancelled,
    #[error("rpc client is shut down")]
    Closed,
}

/// ChannelPool
///
/// Owns the process-wide broker connection and bounds how many channels may be
/// open on it at once.
///
/// The connection is established on the first `acquire` and reused afterwards. A
/// failed connect is not cached, and a connection that can no longer open channels
/// is dropped, so the next call reconnects. `shutdown` closes it.
pub struct ChannelPool {
    broker: Arc<dyn Broker>,
    connection: Mutex<Option<Arc<dyn BrokerConnection>>>,
    permits: Arc<Semaphore>,
    max_channels: usize,
}

/// PooledChannel
///
/// A channel plus the permit that accounts for it. Dropping it releases the slot;
/// `close` should be called first.
pub struct PooledChannel {
    channel: Box<dyn BrokerChannel>,
    _permit: OwnedSemaphorePermit,
}

impl PooledChannel {
    pub fn channel(&self) -> &dyn BrokerChannel {
        self.channel.as_ref()
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close().await {
            tracing::warn!(error = %e, "failed to close rpc channel");
        }
    }
}

impl ChannelPool {
    pub fn new(broker: Arc<dyn Broker>, max_channels: usize) -> Self {
        let max_channels = max_channels.max(1);
        Self {
            broker,
            connection: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max_channels)),
            max_channels,
        }
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Channels that can be opened right now without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Waits for a free slot, then opens a fresh channel on the shared connection.
    pub async fn acquire(&self) -> Result<PooledChannel, RpcError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RpcError::Closed)?;

        let connection = self.connection().await?;
        match connection.create_channel().await {
            Ok(channel) => Ok(PooledChannel {
                channel,
                _permit: permit,
            }),
            Err(e) => {
                self.discard(&connection).await;
                Err(e)
            }
        }
    }

    async fn connection(&self) -> Result<Arc<dyn BrokerConnection>, RpcError> {
        let mut cached = self.connection.lock().await;
        if let Some(connection) = cached.as_ref() {
            return Ok(connection.clone());
        }
        tracing::debug!("establishing broker connection");
        let connection = self.broker.connect().await?;
        *cached = Some(connection.clone());
        Ok(connection)
    }

    /// Forgets `failed` unless another call already replaced it.
    async fn discard(&self, failed: &Arc<dyn BrokerConnection>) {
        let mut cached = self.connection.lock().await;
        if cached.as_ref().is_some_and(|current| Arc::ptr_eq(current, failed)) {
            tracing::warn!("broker connection unusable, reconnecting on next call");
            *cached = None;
        }
    }

    /// Refuses new channels and closes the shared connection if one was made.
    pub async fn shutdown(&self) {
        self.permits.close();
        if let Some(connection) = self.connection.lock().await.take() {
            match connection.close().await {
                Ok(()) => tracing::info!("broker connection closed"),
                Err(e) => tracing::warn!(error = %e, "failed to close broker connection"),
            }
        }
    }
}

/// RpcClient
///
/// Issues single-shot calls against remote services reachable through the broker.
/// Every call gets its own channel and reply queue, runs under a deadline, and can
/// be cancelled. The reply queue is deleted before the channel closes.
pub struct RpcClient {
    pool: Arc<ChannelPool>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(pool: Arc<ChannelPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// call
    ///
    /// Calls `service.method(*args)` and resolves with the decoded reply body.
    pub async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with_cancel(service, method, args, CancellationToken::new())
            .await
    }

    /// call_with_cancel
    ///
    /// Same as `call`, but gives up with `RpcError::Cancelled` once `cancel` fires.
    /// The deadline covers waiting for a pool slot as well as waiting for the reply.
    pub async fn call_with_cancel(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        if service.is_empty() || method.is_empty() {
            return Err(RpcError::InvalidTarget(format!("{:?}.{:?}", service, method)));
        }
        let routing_key = format!("{}.{}", service, method);
        let deadline = Instant::now() + self.timeout;

        // Cancellation and the deadline are polled first so an expired or
        // cancelled call never publishes.
        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RpcError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(RpcError::Timeout(self.timeout)),
            acquired = self.pool.acquire() => acquired?,
        };

        let mut reply_queue = None;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(RpcError::Timeout(self.timeout)),
            reply = round_trip(channel.channel(), &routing_key, args, &mut reply_queue) => reply,
        };

        if let Err(e) = &outcome {
            tracing::warn!(routing_key = %routing_key, error = %e, "rpc call failed");
        }

        // An exclusive queue lives as long as the connection, not the channel.
        if let Some(queue) = reply_queue {
            if let Err(e) = channel.channel().delete_queue(&queue).await {
                tracing::warn!(queue = %queue, error = %e, "failed to delete rpc reply queue");
            }
        }
        channel.close().await;
        outcome
    }
}

/// One request/reply exchange on an already-open channel. The reply queue's name
/// is written to `declared` as soon as it exists so the caller can delete it.
async fn round_trip(
    channel: &dyn BrokerChannel,
    routing_key: &str,
    args: Vec<Value>,
    declared: &mut Option<String>,
) -> Result<Value, RpcError> {
    channel.declare_topic_exchange(RPC_EXCHANGE).await?;

    let reply_queue = channel.declare_reply_queue().await?;
    *declared = Some(reply_queue.clone());
    channel
        .bind_queue(&reply_queue, RPC_EXCHANGE, &reply_queue)
        .await?;

    let correlation_id = Uuid::new_v4().to_string();
    let payload = serde_json::to_vec(&json!({ "args": args, "kwargs": {} }))?;

    let properties = PublishProperties {
        content_type: CONTENT_TYPE.to_string(),
        content_encoding: CONTENT_ENCODING.to_string(),
        correlation_id: correlation_id.clone(),
        reply_to: reply_queue.clone(),
    };

    channel
        .publish(RPC_EXCHANGE, routing_key, payload, properties)
        .await?;
    tracing::info!(
        exchange = RPC_EXCHANGE,
        routing_key = %routing_key,
        correlation_id = %correlation_id,
        "rpc request published"
    );

    let mut replies = channel.consume(&reply_queue).await?;
    while let Some(delivery) = replies.next().await {
        let delivery = delivery?;
        if delivery.correlation_id.as_deref() != Some(correlation_id.as_str()) {
            tracing::debug!(
                expected = %correlation_id,
                received = ?delivery.correlation_id,
                "ignoring reply with foreign correlation id"
            );
            continue;
        }
        let reply = serde_json::from_slice::<Value>(&delivery.body)?;
        tracing::debug!(correlation_id = %correlation_id, "rpc reply received");
        return Ok(reply);
    }

    Err(RpcError::Consume("reply queue closed before a reply arrived".to_string()))
}

/// RpcState
///
/// The shared handle stored in the application state.
pub type RpcState = Arc<RpcClient>;
