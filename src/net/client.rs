//! Remote worker client.
//!
//! Connects to a broker consumer and loops: request work, receive,
//! evaluate, respond. A keep-alive sub-protocol detects a vanished
//! server; `idle` commands throttle the client while the broker has no
//! work.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::executor::Evaluation;
use crate::random::create_rng_entropy;

use super::protocol::{
    assemble_command, assemble_result, decode_work_item, encode_work_item, parse_idle, read_field,
    read_numeric_field, read_payload, SerializationMode,
};

/// Configuration of a remote worker client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Consumer host name or address.
    pub host: String,
    /// Consumer port.
    pub port: u16,
    /// `idle` rounds tolerated before the client shuts down
    /// (0 = unlimited).
    #[serde(rename = "ws_maxStalls")]
    pub max_stalls: u32,
    /// Connection attempts before giving up (0 = retry forever).
    #[serde(rename = "ws_maxConnectionAttempts")]
    pub max_connection_attempts: u32,
    /// Keep-alive ping period.
    pub ping_interval: Duration,
    /// Unanswered pings tolerated before the server is presumed gone.
    pub max_open_pings: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_stalls: 0,
            max_connection_attempts: 10,
            ping_interval: Duration::from_secs(10),
            max_open_pings: 3,
        }
    }
}

impl ClientConfig {
    /// Sets the consumer endpoint.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the stall limit (0 = unlimited).
    pub fn with_max_stalls(mut self, max: u32) -> Self {
        self.max_stalls = max;
        self
    }

    /// Sets the connection-attempt limit (0 = retry forever).
    pub fn with_max_connection_attempts(mut self, max: u32) -> Self {
        self.max_connection_attempts = max;
        self
    }

    /// Sets the keep-alive period.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// A remote worker: evaluates individuals shipped by a broker consumer.
pub struct WorkerClient {
    config: ClientConfig,
    evaluation: Evaluation,
}

impl WorkerClient {
    /// Creates a worker with the user's evaluation bundle.
    pub fn new(config: ClientConfig, evaluation: Evaluation) -> Self {
        WorkerClient { config, evaluation }
    }

    /// Runs the worker until the server closes the session, a limit
    /// strikes, or the connection breaks. Blocking; builds its own
    /// reactor.
    pub fn run(&self) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("paropt-worker")
            .enable_all()
            .build()?;
        runtime.block_on(self.run_async())
    }

    /// The worker loop, for embedding into an existing reactor.
    pub async fn run_async(&self) -> Result<(), Error> {
        let stream = self.try_connect().await?;
        let (mut reader, writer) = stream.into_split();
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(32);
        let writer_task = tokio::spawn(write_strand(writer, write_rx));

        let outstanding = Arc::new(AtomicU32::new(0));
        let (gone_tx, mut gone_rx) = watch::channel(false);
        let ping_task = tokio::spawn(ping_strand(
            write_tx.clone(),
            outstanding.clone(),
            gone_tx,
            self.config.ping_interval,
            self.config.max_open_pings,
        ));

        write_tx
            .send(assemble_command("ready"))
            .await
            .map_err(|_| Error::Network("write strand closed before start".into()))?;

        let mut stalls: u32 = 0;
        let mut compute_tasks: Vec<JoinHandle<()>> = Vec::new();

        let outcome: Result<(), Error> = loop {
            tokio::select! {
                _ = gone_rx.changed() => {
                    break Err(Error::Network("server stopped answering pings".into()));
                }
                command = read_field(&mut reader) => {
                    let command = match command {
                        Ok(c) => c,
                        Err(_) => {
                            // The server likely shut down: a normal end.
                            info!("connection closed by server");
                            break Ok(());
                        }
                    };
                    match command.as_str() {
                        "close" => {
                            info!("server sent close");
                            break Ok(());
                        }
                        "unknown" => {
                            warn!("server did not recognize a command");
                            break Err(Error::Network(
                                "server did not recognize a command".into(),
                            ));
                        }
                        "pong" => {
                            let _ = outstanding.fetch_update(
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                                |v| v.checked_sub(1),
                            );
                        }
                        cmd if cmd.starts_with("idle(") => {
                            let Some(sleep_ms) = parse_idle(cmd) else {
                                warn!(command = cmd, "malformed idle command");
                                break Err(Error::Network("malformed idle command".into()));
                            };
                            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                            stalls += 1;
                            if self.config.max_stalls > 0 && stalls > self.config.max_stalls {
                                info!(stalls, "stall limit reached, shutting down");
                                break Ok(());
                            }
                            if write_tx.send(assemble_command("ready")).await.is_err() {
                                break Ok(());
                            }
                        }
                        "compute" => {
                            match receive_compute(&mut reader).await {
                                Ok((payload, mode)) => {
                                    stalls = 0;
                                    compute_tasks.push(tokio::spawn(process_compute(
                                        payload,
                                        mode,
                                        self.evaluation.clone(),
                                        write_tx.clone(),
                                    )));
                                }
                                Err(err) => break Err(err),
                            }
                        }
                        other => {
                            warn!(command = other, "malformed command");
                            break Err(Error::Network(format!(
                                "malformed command {other:?}"
                            )));
                        }
                    }
                }
            }
        };

        ping_task.abort();
        for task in compute_tasks {
            let _ = task.await;
        }
        drop(write_tx);
        let _ = writer_task.await;
        outcome
    }

    /// Resolves and connects, sleeping a uniform random interval
    /// `[0, 2 * attempt]` seconds between failed attempts.
    async fn try_connect(&self) -> Result<TcpStream, Error> {
        let mut rng = create_rng_entropy();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
                Ok(stream) => {
                    info!(total_attempts = attempt, "connected to consumer");
                    return Ok(stream);
                }
                Err(err) => {
                    if self.config.max_connection_attempts > 0
                        && attempt >= self.config.max_connection_attempts
                    {
                        return Err(Error::Network(format!(
                            "giving up after {attempt} connection attempts: {err}"
                        )));
                    }
                    let backoff = rng.random_range(0.0..(2.0 * f64::from(attempt)));
                    debug!(attempt, backoff, "connect failed, backing off");
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
            }
        }
    }
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

async fn ping_strand(
    write_tx: mpsc::Sender<Vec<u8>>,
    outstanding: Arc<AtomicU32>,
    gone: watch::Sender<bool>,
    period: Duration,
    max_open: u32,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // consume the immediate first tick
    loop {
        ticker.tick().await;
        let open = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        if open > max_open {
            warn!(open, "too many unanswered pings");
            let _ = gone.send(true);
            break;
        }
        if write_tx.send(assemble_command("ping")).await.is_err() {
            break;
        }
    }
}

/// Reads the size, serialization-mode, and payload parts of a `compute`
/// message.
async fn receive_compute(
    reader: &mut OwnedReadHalf,
) -> Result<(Vec<u8>, SerializationMode), Error> {
    let size = read_numeric_field(reader).await? as usize;
    let mode_text = read_field(reader).await?;
    if mode_text.is_empty() {
        warn!("empty serialization-mode field");
        return Err(Error::Network("empty serialization-mode field".into()));
    }
    let code: u8 = mode_text
        .parse()
        .map_err(|_| Error::Network(format!("bad serialization-mode field {mode_text:?}")))?;
    let mode = SerializationMode::from_code(code).map_err(Error::Network)?;
    let payload = read_payload(reader, size).await?;
    Ok((payload, mode))
}

/// Deserializes, evaluates off the reactor, and responds on the write
/// strand.
async fn process_compute(
    payload: Vec<u8>,
    mode: SerializationMode,
    evaluation: Evaluation,
    write_tx: mpsc::Sender<Vec<u8>>,
) {
    let item = match decode_work_item(&payload, mode) {
        Ok(item) => item,
        Err(err) => {
            warn!(%err, "dropping undeserializable work item");
            // Ask for fresh work so the session does not go quiet.
            let _ = write_tx.send(assemble_command("ready")).await;
            return;
        }
    };
    let evaluated = tokio::task::spawn_blocking(move || {
        let mut item = item;
        evaluation.evaluate(&mut item.individual);
        item
    })
    .await;
    match evaluated {
        Ok(item) => match encode_work_item(&item, mode) {
            Ok(result_payload) => {
                let _ = write_tx.send(assemble_result(&result_payload)).await;
            }
            Err(err) => {
                warn!(%err, "failed to encode result");
                let _ = write_tx.send(assemble_command("ready")).await;
            }
        },
        Err(err) => {
            warn!(%err, "evaluation task failed");
            let _ = write_tx.send(assemble_command("ready")).await;
        }
    }
}
