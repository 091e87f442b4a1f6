//! WebSocket log subscriptions multiplexed over one connection per chain.
//!
//! A single driver task owns the socket. Monitors talk to it through a
//! command channel: `subscribe_logs` registers a filter and returns a
//! [`LogSubscription`] whose drop hook sends the matching unsubscribe.
//!
//! Transport failures stay inside the driver. When the socket drops it
//! reconnects with capped exponential backoff and re-issues `eth_subscribe`
//! for every live filter, so subscribers only ever see logs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::domain::{
    AppError, BlockchainError, Chain, LogEntry, LogFilter, LogSubscriber, LogSubscription,
};

use super::erc20::to_quantity;
use super::evm::{RpcError, RpcLog};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered logs per subscription before new ones are dropped
const SUBSCRIPTION_BUFFER: usize = 256;

/// WebSocket transport settings
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }
}

enum Command {
    Subscribe {
        local_id: u64,
        filter: LogFilter,
        sink: mpsc::Sender<LogEntry>,
        reply: oneshot::Sender<Result<u64, AppError>>,
    },
    Unsubscribe {
        local_id: u64,
    },
}

struct ActiveSubscription {
    filter: LogFilter,
    sink: mpsc::Sender<LogEntry>,
    remote_id: Option<String>,
}

enum PendingRequest {
    Subscribe {
        local_id: u64,
        reply: Option<oneshot::Sender<Result<u64, AppError>>>,
    },
    Unsubscribe,
}

/// Push endpoint for one EVM chain
pub struct WsLogSubscriber {
    chain: Chain,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
    next_local_id: AtomicU64,
    /// Longest wait for the server to confirm an `eth_subscribe`
    reply_timeout: Duration,
}

impl WsLogSubscriber {
    /// Open the socket and start the driver. Fails if the first handshake
    /// does not complete within `connect_timeout`.
    pub async fn connect(chain: Chain, url: &str, config: WsConfig) -> Result<Self, AppError> {
        let stream = open(url, config.connect_timeout).await?;
        info!(chain = %chain, "WebSocket push connection established");

        let reply_timeout = config.connect_timeout;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            chain,
            url: url.to_string(),
            config,
            commands: command_rx,
            subscriptions: HashMap::new(),
            remote_to_local: HashMap::new(),
            pending: HashMap::new(),
            orphans: Vec::new(),
            next_request_id: 1,
        };
        let driver = tokio::spawn(driver.run(stream));

        Ok(Self {
            chain,
            commands,
            driver,
            next_local_id: AtomicU64::new(1),
            reply_timeout,
        })
    }
}

impl Drop for WsLogSubscriber {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl LogSubscriber for WsLogSubscriber {
    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription, AppError> {
        let (sink, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (reply, reply_rx) = oneshot::channel();
        let closed = || {
            AppError::Blockchain(BlockchainError::SubscriptionClosed(format!(
                "{} push connection is shut down",
                self.chain
            )))
        };

        let local_id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        self.commands
            .send(Command::Subscribe {
                local_id,
                filter,
                sink,
                reply,
            })
            .map_err(|_| closed())?;

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(reply) => {
                reply.map_err(|_| closed())??;
            }
            Err(_) => {
                // A late confirmation finds no registration and is unsubscribed
                let _ = self.commands.send(Command::Unsubscribe { local_id });
                warn!(chain = %self.chain, local_id, "eth_subscribe not confirmed in time");
                return Err(AppError::Blockchain(BlockchainError::Timeout(format!(
                    "{} did not confirm the log subscription within {}s",
                    self.chain,
                    self.reply_timeout.as_secs_f64()
                ))));
            }
        }

        let commands = self.commands.clone();
        Ok(
            LogSubscription::new(format!("{}:{}", self.chain, local_id), receiver).with_drop_hook(
                move || {
                    let _ = commands.send(Command::Unsubscribe { local_id });
                },
            ),
        )
    }
}

async fn open(url: &str, timeout: Duration) -> Result<WsStream, AppError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(AppError::Blockchain(BlockchainError::Connection(
            e.to_string(),
        ))),
        Err(_) => Err(AppError::Blockchain(BlockchainError::Timeout(format!(
            "WebSocket handshake with {} timed out",
            url
        )))),
    }
}

fn subscribe_payload(request_id: u64, filter: &LogFilter) -> String {
    let mut params = serde_json::json!({
        "address": filter.address,
        "topics": filter.topics,
    });
    if let Some(from) = filter.from_block {
        params["fromBlock"] = serde_json::json!(to_quantity(from));
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "method": "eth_subscribe",
        "params": ["logs", params],
    })
    .to_string()
}

fn unsubscribe_payload(request_id: u64, remote_id: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "method": "eth_unsubscribe",
        "params": [remote_id],
    })
    .to_string()
}

/// Why the inner connection loop returned
enum Exit {
    Shutdown,
    Disconnected,
}

struct Driver {
    chain: Chain,
    url: String,
    config: WsConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    subscriptions: HashMap<u64, ActiveSubscription>,
    remote_to_local: HashMap<String, u64>,
    pending: HashMap<u64, PendingRequest>,
    /// Server-side ids confirmed after their subscriber already left
    orphans: Vec<String>,
    next_request_id: u64,
}

impl Driver {
    async fn run(mut self, mut stream: WsStream) {
        loop {
            match self.serve(&mut stream).await {
                Exit::Shutdown => {
                    let _ = stream.close(None).await;
                    debug!(chain = %self.chain, "Push connection driver shut down");
                    return;
                }
                Exit::Disconnected => {
                    self.reset_after_disconnect();
                    match self.reconnect().await {
                        Some(fresh) => stream = fresh,
                        None => return,
                    }
                    if let Err(e) = self.resubscribe_all(&mut stream).await {
                        warn!(chain = %self.chain, error = %e, "Resubscribe after reconnect failed");
                    }
                }
            }
        }
    }

    async fn serve(&mut self, stream: &mut WsStream) -> Exit {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Exit::Shutdown;
                    };
                    if let Err(e) = self.handle_command(stream, command).await {
                        warn!(chain = %self.chain, error = %e, "Push connection write failed");
                        return Exit::Disconnected;
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(text.as_str());
                            if let Err(e) = self.flush_orphans(stream).await {
                                warn!(chain = %self.chain, error = %e, "Push connection write failed");
                                return Exit::Disconnected;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(chain = %self.chain, frame = ?frame, "Push connection closed by server");
                            return Exit::Disconnected;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(chain = %self.chain, error = %e, "Push connection transport error");
                            return Exit::Disconnected;
                        }
                        None => return Exit::Disconnected,
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        stream: &mut WsStream,
        command: Command,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match command {
            Command::Subscribe {
                local_id,
                filter,
                sink,
                reply,
            } => {
                let request_id = self.request_id();
                let payload = subscribe_payload(request_id, &filter);
                self.subscriptions.insert(
                    local_id,
                    ActiveSubscription {
                        filter,
                        sink,
                        remote_id: None,
                    },
                );
                self.pending.insert(
                    request_id,
                    PendingRequest::Subscribe {
                        local_id,
                        reply: Some(reply),
                    },
                );
                stream.send(Message::Text(payload.into())).await
            }
            Command::Unsubscribe { local_id } => {
                let Some(sub) = self.subscriptions.remove(&local_id) else {
                    return Ok(());
                };
                let Some(remote_id) = sub.remote_id else {
                    return Ok(());
                };
                self.remote_to_local.remove(&remote_id);
                let request_id = self.request_id();
                self.pending.insert(request_id, PendingRequest::Unsubscribe);
                debug!(chain = %self.chain, subscription = %remote_id, "Unsubscribing logs");
                stream
                    .send(Message::Text(unsubscribe_payload(request_id, &remote_id).into()))
                    .await
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(chain = %self.chain, error = %e, "Unparseable push message");
                return;
            }
        };

        if value.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
            self.handle_notification(&value["params"]);
            return;
        }

        let Some(request_id) = value.get("id").and_then(|id| id.as_u64()) else {
            return;
        };
        match self.pending.remove(&request_id) {
            Some(PendingRequest::Subscribe { local_id, reply }) => {
                self.handle_subscribe_response(local_id, reply, &value)
            }
            Some(PendingRequest::Unsubscribe) | None => {}
        }
    }

    fn handle_subscribe_response(
        &mut self,
        local_id: u64,
        reply: Option<oneshot::Sender<Result<u64, AppError>>>,
        value: &serde_json::Value,
    ) {
        if let Some(error) = value.get("error") {
            let error = serde_json::from_value::<RpcError>(error.clone())
                .map(RpcError::into_app_error)
                .unwrap_or_else(|e| {
                    AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string()))
                });
            error!(chain = %self.chain, error = %error, "eth_subscribe rejected");
            self.subscriptions.remove(&local_id);
            if let Some(reply) = reply {
                let _ = reply.send(Err(error));
            }
            return;
        }

        let Some(remote_id) = value.get("result").and_then(|r| r.as_str()) else {
            return;
        };
        match self.subscriptions.get_mut(&local_id) {
            Some(sub) => {
                sub.remote_id = Some(remote_id.to_string());
                self.remote_to_local.insert(remote_id.to_string(), local_id);
                debug!(chain = %self.chain, local_id, subscription = %remote_id, "Log subscription active");
            }
            None => {
                // Dropped before the server confirmed it
                self.orphans.push(remote_id.to_string());
            }
        }
        if let Some(reply) = reply {
            let _ = reply.send(Ok(local_id));
        }
    }

    fn handle_notification(&mut self, params: &serde_json::Value) {
        let Some(remote_id) = params.get("subscription").and_then(|s| s.as_str()) else {
            return;
        };
        let Some(local_id) = self.remote_to_local.get(remote_id).copied() else {
            return;
        };

        let entry = serde_json::from_value::<RpcLog>(params["result"].clone())
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))
            .and_then(LogEntry::try_from);
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(chain = %self.chain, error = %e, "Dropping malformed log notification");
                return;
            }
        };

        let Some(sub) = self.subscriptions.get(&local_id) else {
            return;
        };
        match sub.sink.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(chain = %self.chain, local_id, "Subscriber lagging, log dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver gone; its Unsubscribe command is already queued
            }
        }
    }

    async fn flush_orphans(
        &mut self,
        stream: &mut WsStream,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        while let Some(remote_id) = self.orphans.pop() {
            let request_id = self.request_id();
            self.pending.insert(request_id, PendingRequest::Unsubscribe);
            stream
                .send(Message::Text(unsubscribe_payload(request_id, &remote_id).into()))
                .await?;
        }
        Ok(())
    }

    fn reset_after_disconnect(&mut self) {
        self.orphans.clear();
        self.remote_to_local.clear();
        for sub in self.subscriptions.values_mut() {
            sub.remote_id = None;
        }
        // Callers waiting on a subscribe keep their registration; it is
        // re-issued once the socket is back.
        for (_, pending) in self.pending.drain() {
            if let PendingRequest::Subscribe {
                local_id,
                reply: Some(reply),
            } = pending
            {
                let _ = reply.send(Ok(local_id));
            }
        }
    }

    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut attempt: u32 = 0;
        loop {
            let delay = self
                .config
                .reconnect_base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(self.config.reconnect_max_delay);
            tokio::time::sleep(delay).await;

            // Stop reconnecting once every handle is gone
            if self.commands.is_closed() && self.subscriptions.is_empty() {
                return None;
            }

            match open(&self.url, self.config.connect_timeout).await {
                Ok(stream) => {
                    info!(chain = %self.chain, attempt, "Push connection re-established");
                    return Some(stream);
                }
                Err(e) => {
                    attempt += 1;
                    warn!(chain = %self.chain, attempt, error = %e, "Push reconnect failed");
                }
            }
        }
    }

    async fn resubscribe_all(
        &mut self,
        stream: &mut WsStream,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let local_ids: Vec<u64> = self.subscriptions.keys().copied().collect();
        for local_id in local_ids {
            let request_id = self.request_id();
            let Some(sub) = self.subscriptions.get(&local_id) else {
                continue;
            };
            let payload = subscribe_payload(request_id, &sub.filter);
            self.pending.insert(
                request_id,
                PendingRequest::Subscribe {
                    local_id,
                    reply: None,
                },
            );
            stream.send(Message::Text(payload.into())).await?;
        }
        Ok(())
    }

    fn request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}
