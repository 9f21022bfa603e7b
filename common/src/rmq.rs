use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use async_stream::stream;
use futures::{Stream, StreamExt};
use lapin::options::{BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, Mutex};

/// A process-wide RabbitMQ connection with explicit init and teardown.
///
/// The connection is supervised: broker errors are reported on an internal
/// queue and `handle_reconnects` re-dials until the broker comes back.
/// Consumers obtained through [`RmqConnection::consume`] transparently
/// resubscribe after a connection loss.
pub struct RmqConnection {
    uri: String,
    timeout: Duration,
    properties: ConnectionProperties,
    connection: ArcSwap<Connection>,
    error_send: mpsc::Sender<()>,
    error_recv: Mutex<mpsc::Receiver<()>>,
}

impl RmqConnection {
    pub async fn connect(
        uri: String,
        properties: ConnectionProperties,
        timeout: Duration,
    ) -> Result<Self> {
        let (error_send, error_recv) = mpsc::channel(1);

        let conn = Self::dial(&uri, &properties, timeout, error_send.clone()).await?;

        Ok(Self {
            uri,
            timeout,
            properties,
            connection: ArcSwap::from(Arc::new(conn)),
            error_send,
            error_recv: Mutex::new(error_recv),
        })
    }

    async fn dial(
        uri: &str,
        properties: &ConnectionProperties,
        timeout: Duration,
        error_send: mpsc::Sender<()>,
    ) -> Result<Connection> {
        let conn =
            tokio::time::timeout(timeout, Connection::connect(uri, properties.clone())).await??;

        conn.on_error(move |err| {
            tracing::error!("rabbitmq connection error: {:?}", err);
            error_send.try_send(()).ok();
        });

        Ok(conn)
    }

    /// Runs forever, replacing the connection whenever the broker reports an
    /// error. Intended to be raced against the process context.
    pub async fn handle_reconnects(&self) -> Result<()> {
        loop {
            self.error_recv
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| anyhow!("rabbitmq error queue closed"))?;

            loop {
                match Self::dial(
                    &self.uri,
                    &self.properties,
                    self.timeout,
                    self.error_send.clone(),
                )
                .await
                {
                    Ok(conn) => {
                        tracing::info!("reconnected to rabbitmq");
                        self.connection.store(Arc::new(conn));
                        break;
                    }
                    Err(err) => {
                        tracing::error!("failed to reconnect to rabbitmq: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Opens a channel on the current connection, re-dialing if it is no
    /// longer connected.
    pub async fn channel(&self) -> Result<Channel> {
        let conn = self.connection.load();
        if conn.status().connected() {
            return Ok(conn.create_channel().await?);
        }

        let conn = Self::dial(
            &self.uri,
            &self.properties,
            self.timeout,
            self.error_send.clone(),
        )
        .await?;
        let channel = conn.create_channel().await?;
        self.connection.store(Arc::new(conn));

        Ok(channel)
    }

    /// Declares a durable queue, creating it if it does not exist.
    pub async fn declare_queue(&self, name: &str) -> Result<()> {
        let channel = self.channel().await?;

        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    /// Consumes deliveries from the queue, declaring it first. The stream
    /// only ends when dropped; connection losses resubscribe internally.
    pub fn consume(
        &self,
        queue_name: impl ToString,
        consumer_tag: impl ToString,
        options: BasicConsumeOptions,
    ) -> impl Stream<Item = Result<lapin::message::Delivery>> + '_ {
        let queue_name = queue_name.to_string();
        let consumer_tag = consumer_tag.to_string();

        stream!({
            'connection_loop: loop {
                let channel = match self.channel().await {
                    Ok(channel) => channel,
                    Err(err) => {
                        yield Err(err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue 'connection_loop;
                    }
                };

                if let Err(err) = channel
                    .queue_declare(
                        &queue_name,
                        QueueDeclareOptions {
                            durable: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                {
                    yield Err(anyhow!("failed to declare queue: {}", err));
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue 'connection_loop;
                }

                let mut consumer = match channel
                    .basic_consume(&queue_name, &consumer_tag, options, FieldTable::default())
                    .await
                {
                    Ok(consumer) => consumer,
                    Err(err) => {
                        yield Err(anyhow!("failed to register consumer: {}", err));
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue 'connection_loop;
                    }
                };

                loop {
                    match consumer.next().await {
                        Some(Ok(delivery)) => yield Ok(delivery),
                        Some(Err(lapin::Error::IOError(err)))
                            if err.kind() == std::io::ErrorKind::ConnectionReset =>
                        {
                            continue 'connection_loop;
                        }
                        Some(Err(err)) => {
                            yield Err(anyhow!("failed to get message: {}", err));
                        }
                        None => continue 'connection_loop,
                    }
                }
            }
        })
    }

    /// Explicit teardown. Dropping the handle also closes the connection,
    /// this just makes shutdown observable.
    pub async fn close(&self) -> Result<()> {
        self.connection.load().close(0, "shutdown").await?;
        Ok(())
    }
}
