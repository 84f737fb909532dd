//! Line-delimited JSON-RPC transport.
//!
//! Wires any `AsyncRead`/`AsyncWrite` pair (normally the process's
//! stdin/stdout, with the embedding page's bridge on the other side) to the
//! [`HostTransport`] contract:
//!
//! * every outbound [`CodapRequest`] becomes one `codap` call line with a fresh id
//! * responses are matched back to their caller by id
//! * host-initiated `codap` calls are answered through the registered
//!   [`NotificationHandler`]
//! * a `disconnect` notification or EOF tears the channel down and fails every
//!   in-flight request with [`ChannelError::Closed`]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::jsonrpc::{INVALID_PARAMS, Id, METHOD_NOT_FOUND, Message, Method, Request, Response};
use crate::message::{CodapRequest, CodapResponse};
use crate::transport::{ChannelError, HostTransport, NotificationHandler};

type HandlerSlot = Arc<RwLock<Option<Arc<dyn NotificationHandler>>>>;
type Inflight = Arc<DashMap<String, oneshot::Sender<Response>>>;

pub struct StdioTransport {
    tx: mpsc::Sender<Message>,
    inflight: Inflight,
    handler: HandlerSlot,
    closed: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Talk to the host over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawns the reader and writer tasks; must be called inside a Tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Message>(32);
        let inflight: Inflight = Arc::new(DashMap::new());
        let handler: HandlerSlot = Arc::new(RwLock::new(None));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(
            writer,
            rx,
            Arc::clone(&inflight),
            Arc::clone(&handler),
            Arc::clone(&closed),
        ));
        tokio::spawn(read_loop(
            reader,
            tx.clone(),
            Arc::clone(&inflight),
            Arc::clone(&handler),
            Arc::clone(&closed),
        ));

        Self {
            tx,
            inflight,
            handler,
            closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostTransport for StdioTransport {
    async fn send(&self, request: CodapRequest) -> Result<CodapResponse, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let id = Id::String(Uuid::new_v4().to_string());
        let key = id.key();
        let params = serde_json::to_value(&request)?;

        let (tx_rsp, rx_rsp) = oneshot::channel();
        self.inflight.insert(key.clone(), tx_rsp);
        // the reader may have shut down between the check above and the insert
        if self.is_closed() {
            self.inflight.remove(&key);
            return Err(ChannelError::Closed);
        }

        let req = Request::call(id, Method::Codap, Some(params));
        if self.tx.send(Message::Request(req)).await.is_err() {
            self.inflight.remove(&key);
            return Err(ChannelError::Closed);
        }

        let rsp = rx_rsp.await.map_err(|_| ChannelError::Closed)?;
        if let Some(err) = rsp.error {
            return Err(ChannelError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(rsp.result.unwrap_or(Value::Null))?)
    }

    fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        match self.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }
}

fn current_handler(slot: &HandlerSlot) -> Option<Arc<dyn NotificationHandler>> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Fails every in-flight request and, for whichever side gets here first,
/// tells the handler the host is gone.
async fn shut_down(inflight: &Inflight, closed: &AtomicBool, handler: &HandlerSlot) {
    let first = !closed.swap(true, Ordering::SeqCst);
    // dropping the senders wakes every waiting caller with `Closed`
    inflight.clear();
    if !first {
        return;
    }
    if let Some(h) = current_handler(handler) {
        h.on_disconnect().await;
    }
}

// -----------------------------------------------------------------------------
// Writer: single task so lines leave in the order they were queued
// -----------------------------------------------------------------------------
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Message>,
    inflight: Inflight,
    handler: HandlerSlot,
    closed: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(msg) = rx.recv().await {
        let line = match serde_json::to_string(&msg) {
            Ok(line) => line,
            Err(err) => {
                error!("could not encode host message: {err}");
                continue;
            }
        };
        trace!(%line, "plugin -> host");
        let written: std::io::Result<()> = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            warn!("host channel write failed: {err}");
            break;
        }
    }
    shut_down(&inflight, &closed, &handler).await;
}

// -----------------------------------------------------------------------------
// Reader: routes responses to callers and host requests to the handler
// -----------------------------------------------------------------------------
async fn read_loop<R>(
    reader: R,
    tx: mpsc::Sender<Message>,
    inflight: Inflight,
    handler: HandlerSlot,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("host channel reached EOF");
                break;
            }
            Err(err) => {
                warn!("host channel read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        trace!(%line, "host -> plugin");
        match serde_json::from_str::<Message>(&line) {
            Ok(Message::Response(rsp)) => match inflight.remove(&rsp.id.key()) {
                Some((_, waiter)) => {
                    let _ = waiter.send(rsp);
                }
                None => warn!(id = ?rsp.id, "response for unknown request"),
            },
            Ok(Message::Request(req)) => {
                if req.method() == Some(Method::Disconnect) {
                    debug!("host requested disconnect");
                    break;
                }
                if let Some(reply) = handle_host_request(req, &handler).await {
                    if tx.send(Message::Response(reply)).await.is_err() {
                        break;
                    }
                }
            }
            Err(err) => warn!("ignoring malformed host line: {err}"),
        }
    }

    shut_down(&inflight, &closed, &handler).await;
}

/// Runs on the reader task, so handlers must not wait on host responses.
async fn handle_host_request(req: Request, slot: &HandlerSlot) -> Option<Response> {
    let id = req.id.clone();
    if req.method() != Some(Method::Codap) {
        let message = format!("unknown method '{}'", req.method);
        return id.map(|id| Response::fail(id, METHOD_NOT_FOUND, message, None));
    }

    let request = match req.params.map(serde_json::from_value::<CodapRequest>) {
        Some(Ok(request)) => request,
        Some(Err(err)) => {
            return id.map(|id| Response::fail(id, INVALID_PARAMS, err.to_string(), None));
        }
        None => return id.map(|id| Response::fail(id, INVALID_PARAMS, "missing params", None)),
    };

    let reply = match current_handler(slot) {
        Some(h) => h.on_request(request).await,
        None => CodapResponse::ok(None),
    };
    let id = id?;
    Some(match serde_json::to_value(&reply) {
        Ok(result) => Response::success(id, result),
        Err(err) => Response::fail(id, INVALID_PARAMS, err.to_string(), None),
    })
}
