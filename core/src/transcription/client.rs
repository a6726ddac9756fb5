use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::TranscriptionConfig;
use crate::specialists::{CredentialError, CredentialResolver};

use super::accumulator::{TokenAccumulator, TranscriptEvent};
use super::protocol::{ConfigMessage, ControlMessage, ServerMessage};

const TARGET: &str = "transcription";
const COMMAND_BUFFER: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("speech credential unavailable: {0}")]
    Credential(#[from] CredentialError),
    #[error("failed to connect to speech service: {0}")]
    Connect(String),
    #[error("timed out connecting to speech service")]
    ConnectTimeout,
    #[error("speech protocol error: {0}")]
    Protocol(String),
    #[error("transcription stream closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Configured,
    Streaming,
    Closing,
}

#[derive(Debug)]
enum Command {
    Audio(Bytes),
    Finalize,
    Close,
}

/// Opens streaming recognition sessions. Reconnecting (and replaying audio) after a
/// dropped connection is up to the caller.
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    credentials: Arc<dyn CredentialResolver>,
}

impl TranscriptionClient {
    pub fn new(config: TranscriptionConfig, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// Connects, sends the config handshake, and starts the reader and writer
    /// tasks. Events arrive on the returned receiver until the stream ends.
    pub async fn connect(
        &self,
    ) -> Result<(TranscriptionHandle, mpsc::Receiver<TranscriptEvent>), TranscriptionError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let api_key = self
            .credentials
            .get_api_key(&self.config.credential_service)?;

        let connecting = connect_async(self.config.url.as_str());
        let (socket, _) = match tokio::time::timeout(self.config.connect_timeout(), connecting).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(err)) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TranscriptionError::Connect(err.to_string()));
            }
            Err(_) => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return Err(TranscriptionError::ConnectTimeout);
            }
        };

        let (mut sink, stream) = socket.split();
        let handshake = serde_json::to_string(&ConfigMessage::new(&self.config, &api_key))
            .map_err(|err| TranscriptionError::Protocol(err.to_string()))?;
        if let Err(err) = sink.send(Message::Text(handshake)).await {
            state_tx.send_replace(ConnectionState::Disconnected);
            return Err(TranscriptionError::Connect(err.to_string()));
        }
        state_tx.send_replace(ConnectionState::Configured);
        info!(target: TARGET, url = %self.config.url, model = %self.config.model, "speech stream configured");

        let state_tx = Arc::new(state_tx);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));

        let writer = tokio::spawn(run_writer(
            sink,
            command_rx,
            Arc::clone(&state_tx),
            self.config.keepalive_interval(),
        ));
        let reader = tokio::spawn(run_reader(
            stream,
            event_tx,
            state_tx,
            self.config.idle_timeout(),
        ));

        Ok((
            TranscriptionHandle {
                commands: command_tx,
                state: state_rx,
                writer: Some(writer),
                reader: Some(reader),
            },
            event_rx,
        ))
    }
}

/// Caller side of one recognition stream. Dropping it tears the stream down.
pub struct TranscriptionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TranscriptionHandle {
    pub async fn send_audio(&self, frame: impl Into<Bytes>) -> Result<(), TranscriptionError> {
        let frame = frame.into();
        if frame.is_empty() {
            // an empty frame means end-of-audio on the wire; use close() for that
            warn!(target: TARGET, "ignoring empty audio frame");
            return Ok(());
        }
        self.commands
            .send(Command::Audio(frame))
            .await
            .map_err(|_| TranscriptionError::Closed)
    }

    /// Asks the server to finalize pending provisional tokens now.
    pub async fn force_finalize(&self) -> Result<(), TranscriptionError> {
        self.commands
            .send(Command::Finalize)
            .await
            .map_err(|_| TranscriptionError::Closed)
    }

    /// Signals end of audio. The server flushes remaining tokens and finishes.
    pub async fn close(&self) -> Result<(), TranscriptionError> {
        self.commands
            .send(Command::Close)
            .await
            .map_err(|_| TranscriptionError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the server side of the stream has ended.
    pub async fn closed(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

impl Drop for TranscriptionHandle {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn run_writer(
    mut sink: SplitSink<Socket, Message>,
    mut commands: mpsc::Receiver<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    keepalive: Duration,
) {
    let mut ticker = tokio::time::interval(keepalive);
    ticker.tick().await;
    let mut sent_since_tick = false;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let result = match command {
                    Some(Command::Audio(frame)) => {
                        sent_since_tick = true;
                        state.send_if_modified(|current| {
                            if *current == ConnectionState::Configured {
                                *current = ConnectionState::Streaming;
                                true
                            } else {
                                false
                            }
                        });
                        sink.send(Message::Binary(frame.to_vec())).await
                    }
                    Some(Command::Finalize) => {
                        debug!(target: TARGET, "forcing finalize");
                        match ControlMessage::Finalize.encode() {
                            Ok(text) => sink.send(Message::Text(text)).await,
                            Err(err) => {
                                warn!(target: TARGET, %err, "finalize frame not encoded");
                                continue;
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        state.send_replace(ConnectionState::Closing);
                        if let Err(err) = sink.send(Message::Binary(Vec::new())).await {
                            debug!(target: TARGET, %err, "end-of-audio frame not delivered");
                        }
                        break;
                    }
                };

                if let Err(err) = result {
                    warn!(target: TARGET, %err, "speech socket write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                if !sent_since_tick {
                    match ControlMessage::Keepalive.encode() {
                        Ok(text) => {
                            if let Err(err) = sink.send(Message::Text(text)).await {
                                warn!(target: TARGET, %err, "keepalive failed");
                                break;
                            }
                        }
                        Err(err) => warn!(target: TARGET, %err, "keepalive frame not encoded"),
                    }
                }
                sent_since_tick = false;
            }
        }
    }
}

async fn run_reader(
    mut stream: SplitStream<Socket>,
    events: mpsc::Sender<TranscriptEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    idle_timeout: Duration,
) {
    let mut accumulator = TokenAccumulator::new();

    'read: loop {
        let next = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!(target: TARGET, idle_secs = idle_timeout.as_secs(), "speech stream idle, giving up");
                let _ = events
                    .send(TranscriptEvent::Error {
                        code: None,
                        message: "speech stream idle timeout".into(),
                    })
                    .await;
                break;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let message = match ServerMessage::parse(&text) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(target: TARGET, %err, "unparseable speech message skipped");
                        continue;
                    }
                };
                let finished = message.finished;
                for event in accumulator.ingest(message) {
                    if events.send(event).await.is_err() {
                        debug!(target: TARGET, "event receiver dropped");
                        break 'read;
                    }
                }
                if finished {
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(target: TARGET, ?frame, "speech service closed the stream");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!(target: TARGET, %err, "speech socket read failed");
                let _ = events
                    .send(TranscriptEvent::Error {
                        code: None,
                        message: err.to_string(),
                    })
                    .await;
                break;
            }
            None => break,
        }
    }

    if let Some(event) = accumulator.take_endpoint() {
        let _ = events.send(event).await;
    }
    state.send_replace(ConnectionState::Disconnected);
    info!(target: TARGET, "speech stream ended");
}
