//! Broker consumer: the TCP server that feeds remote workers.
//!
//! One session task runs per connection. Reads never interleave (the
//! session task owns the read half) and writes never interleave (a
//! dedicated writer task owns the write half and drains a channel of
//! pre-assembled messages); reads and writes proceed concurrently.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::error::Error;

use super::protocol::{
    assemble_command, assemble_compute, assemble_idle, decode_work_item, encode_work_item,
    read_field, read_numeric_field, read_payload, SerializationMode,
};

/// Configuration of the broker consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Address to listen on.
    #[serde(rename = "ws_ip")]
    pub ip: String,
    /// Port to listen on (0 picks an ephemeral port).
    #[serde(rename = "ws_port")]
    pub port: u16,
    /// Payload encoding used for outgoing work.
    #[serde(rename = "ws_serializationMode")]
    pub serialization_mode: SerializationMode,
    /// Worker threads of the I/O reactor.
    #[serde(rename = "ws_nListenerThreads")]
    pub n_listener_threads: usize,
    /// Empty broker polls before a worker is sent to sleep.
    #[serde(rename = "brokerRetrieveMaxRetries")]
    pub broker_retrieve_max_retries: u32,
    /// Sleep handed to workers in the `idle` command, in milliseconds.
    #[serde(rename = "noDataSleepMs")]
    pub no_data_sleep_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            serialization_mode: SerializationMode::Binary,
            n_listener_threads: 2,
            broker_retrieve_max_retries: 5,
            no_data_sleep_ms: 50,
        }
    }
}

impl ConsumerConfig {
    /// Sets the listen address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Sets the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the payload encoding.
    pub fn with_serialization_mode(mut self, mode: SerializationMode) -> Self {
        self.serialization_mode = mode;
        self
    }

    /// Sets the reactor thread count.
    pub fn with_n_listener_threads(mut self, n: usize) -> Self {
        self.n_listener_threads = n.max(1);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.ip.is_empty() {
            return Err("ws_ip must not be empty".into());
        }
        if self.n_listener_threads == 0 {
            return Err("ws_nListenerThreads must be at least 1".into());
        }
        Ok(())
    }
}

/// Handle to a running consumer. Dropping it stops the server.
pub struct ConsumerHandle {
    runtime: Option<tokio::runtime::Runtime>,
    stop: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl ConsumerHandle {
    /// The address the consumer actually listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tells every session to send `close` and shuts the reactor down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(true);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(5));
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The broker consumer: accepts worker connections and trades broker
/// work for evaluated results.
pub struct Consumer;

impl Consumer {
    /// Binds the listener and starts serving on a dedicated reactor
    /// thread group.
    pub fn start(config: ConsumerConfig, broker: Broker) -> Result<ConsumerHandle, Error> {
        config.validate().map_err(Error::User)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.n_listener_threads)
            .thread_name("paropt-consumer")
            .enable_all()
            .build()?;

        let listener =
            runtime.block_on(TcpListener::bind((config.ip.as_str(), config.port)))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "broker consumer listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        runtime.spawn(accept_loop(listener, broker, config, stop_rx));

        Ok(ConsumerHandle {
            runtime: Some(runtime),
            stop: stop_tx,
            local_addr,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    broker: Broker,
    config: ConsumerConfig,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!(%peer, "worker connected");
                    tokio::spawn(session(socket, broker.clone(), config.clone(), stop.clone()));
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                }
            }
        }
    }
}

/// One protocol session. Owns the read strand; the spawned writer task
/// owns the write strand.
async fn session(
    socket: TcpStream,
    broker: Broker,
    config: ConsumerConfig,
    mut stop: watch::Receiver<bool>,
) {
    let peer = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let (mut reader, writer) = socket.into_split();
    let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(32);
    let writer_task = tokio::spawn(write_strand(writer, write_rx));

    loop {
        tokio::select! {
            _ = stop.changed() => {
                let _ = write_tx.send(assemble_command("close")).await;
                break;
            }
            command = read_field(&mut reader) => {
                let command = match command {
                    Ok(c) => c,
                    Err(_) => {
                        // Broken connection: the worker went away.
                        info!(%peer, "worker disconnected");
                        break;
                    }
                };
                if *stop.borrow() {
                    let _ = write_tx.send(assemble_command("close")).await;
                    break;
                }
                match command.as_str() {
                    "ping" => {
                        let _ = write_tx.send(assemble_command("pong")).await;
                    }
                    "ready" => {
                        dispatch_work(&broker, &config, &write_tx).await;
                    }
                    "result" => {
                        if receive_result(&mut reader, &broker, &config).await.is_err() {
                            warn!(%peer, "malformed result message");
                            break;
                        }
                        // The worker is free again: hand it fresh work.
                        dispatch_work(&broker, &config, &write_tx).await;
                    }
                    other => {
                        warn!(%peer, command = other, "unknown command");
                        let _ = write_tx.send(assemble_command("unknown")).await;
                    }
                }
            }
        }
    }

    drop(write_tx);
    let _ = writer_task.await;
}

async fn write_strand(mut writer: OwnedWriteHalf, mut messages: mpsc::Receiver<Vec<u8>>) {
    use tokio::io::AsyncWriteExt;
    while let Some(buf) = messages.recv().await {
        if writer.write_all(&buf).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Tries to dequeue work for a ready worker; sends `idle` after the
/// configured number of empty polls.
async fn dispatch_work(broker: &Broker, config: &ConsumerConfig, write_tx: &mpsc::Sender<Vec<u8>>) {
    for _ in 0..config.broker_retrieve_max_retries {
        if let Some(item) = broker.try_take_raw() {
            match encode_work_item(&item, config.serialization_mode) {
                Ok(payload) => {
                    let _ = write_tx
                        .send(assemble_compute(&payload, config.serialization_mode))
                        .await;
                }
                Err(err) => {
                    // The item cannot be shipped; hand it back so the
                    // batch surfaces it as unprocessed.
                    warn!(%err, slot = item.slot, "failed to encode work item");
                    let _ = broker.put_raw(item);
                }
            }
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let _ = write_tx.send(assemble_idle(config.no_data_sleep_ms)).await;
}

/// Reads a `result` payload and re-injects it into the broker off the
/// read path.
async fn receive_result(
    reader: &mut OwnedReadHalf,
    broker: &Broker,
    config: &ConsumerConfig,
) -> std::io::Result<()> {
    let size = read_numeric_field(reader).await? as usize;
    let payload = read_payload(reader, size).await?;
    let broker = broker.clone();
    let mode = config.serialization_mode;
    tokio::spawn(async move {
        match decode_work_item(&payload, mode) {
            Ok(item) => {
                debug!(slot = item.slot, "re-injecting processed item");
                let _ = broker.put_processed(item);
            }
            Err(err) => {
                // Discarded: the slot surfaces as unprocessed at batch
                // close.
                warn!(%err, "dropping undeserializable result");
            }
        }
    });
    Ok(())
}
