use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};
use url::Url;

use crate::error::SignalingError;
use crate::internal::events::{ClientFrame, ServerEvent, ServerFrame};

/// a typed request/response pair on the signaling channel
pub trait SignalingRequest: Serialize {
    const EVENT: &'static str;
    type Response: DeserializeOwned;
}

/// push notifications, in arrival order. the queue is unbounded so events
/// received while the session is still joining are buffered rather than lost
pub type NotificationReceiver = mpsc::UnboundedReceiver<ServerEvent>;

type Pending = HashMap<u64, (&'static str, oneshot::Sender<Result<serde_json::Value, SignalingError>>)>;

struct ChannelInner {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    closed: AtomicBool,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// bidirectional message channel to the SFU signaling endpoint. cheap to
/// clone; all clones share one underlying websocket. a dropped connection is
/// fatal - the orchestrator does not reconnect in place
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

impl SignalingChannel {
    /// dial the signaling endpoint. fails with `ConnectTimeout` when the
    /// websocket handshake does not complete within `timeout`
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, NotificationReceiver), SignalingError> {
        let target = Url::parse(url)
            .map_err(|e| SignalingError::ConnectError(format!("invalid signaling url: {e}")))?;
        let (stream, _response) = tokio::time::timeout(timeout, connect_async(target.as_str()))
            .await
            .map_err(|_| SignalingError::ConnectTimeout)?
            .map_err(|e| SignalingError::ConnectError(e.to_string()))?;
        log::debug!("signaling websocket connected to {url}");
        Ok(Self::from_stream(stream))
    }

    /// wrap an established websocket, spawning the reader and writer tasks
    fn from_stream<S>(stream: WebSocketStream<S>) -> (Self, NotificationReceiver)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<ServerEvent>();

        let inner = Arc::new(ChannelInner {
            outbound: outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            io_tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("failed to encode signaling frame: {e}");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let reader_inner = inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("signaling socket error: {e}");
                        break;
                    }
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                    _ => {
                        log::debug!("ignoring non-text signaling frame");
                        continue;
                    }
                };
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Response { id, data }) => {
                        resolve_pending(&reader_inner, id, Ok(data));
                    }
                    Ok(ServerFrame::Error { id, message }) => {
                        resolve_pending_err(&reader_inner, id, message);
                    }
                    Ok(ServerFrame::Notification { event, data }) => {
                        match ServerEvent::from_wire(&event, data) {
                            Ok(notification) => {
                                let _ = notify_tx.send(notification);
                            }
                            Err(e) => {
                                log::warn!("dropping unknown notification '{event}': {e}")
                            }
                        }
                    }
                    Err(e) => log::warn!("dropping malformed signaling frame: {e}"),
                }
            }
            // socket is gone; nothing in flight can complete anymore
            reader_inner.closed.store(true, Ordering::SeqCst);
            fail_all_pending(&reader_inner);
        });

        {
            let mut io_tasks = inner.io_tasks.lock().unwrap_or_else(|e| e.into_inner());
            io_tasks.push(writer);
            io_tasks.push(reader);
        }

        (Self { inner }, notify_rx)
    }

    /// request/response round trip with a bounded wait
    pub async fn call<R: SignalingRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::ChannelClosed);
        }
        let data = serde_json::to_value(request).map_err(|e| SignalingError::Payload {
            event: R::EVENT,
            message: e.to_string(),
        })?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(id, (R::EVENT, tx));
        }
        let frame = ClientFrame {
            id: Some(id),
            event: R::EVENT.to_owned(),
            data,
        };
        if self.inner.outbound.send(frame).is_err() {
            self.forget_pending(id);
            return Err(SignalingError::ChannelClosed);
        }
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.forget_pending(id);
                Err(SignalingError::CallTimeout { event: R::EVENT })
            }
            Ok(Err(_)) => Err(SignalingError::ChannelClosed),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(value))) => {
                serde_json::from_value(value).map_err(|e| SignalingError::Payload {
                    event: R::EVENT,
                    message: e.to_string(),
                })
            }
        }
    }

    /// fire-and-forget event
    pub fn emit<R: SignalingRequest>(&self, request: &R) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::ChannelClosed);
        }
        let data = serde_json::to_value(request).map_err(|e| SignalingError::Payload {
            event: R::EVENT,
            message: e.to_string(),
        })?;
        let frame = ClientFrame {
            id: None,
            event: R::EVENT.to_owned(),
            data,
        };
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| SignalingError::ChannelClosed)
    }

    /// tear the channel down. safe to call from multiple paths; only the
    /// first invocation does anything
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("closing signaling channel");
        let tasks = {
            let mut io_tasks = self.inner.io_tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *io_tasks)
        };
        for task in tasks {
            task.abort();
        }
        fail_all_pending(&self.inner);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn forget_pending(&self, id: u64) {
        let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&id);
    }
}

fn resolve_pending(inner: &ChannelInner, id: u64, result: Result<serde_json::Value, SignalingError>) {
    let entry = {
        let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&id)
    };
    match entry {
        Some((_, tx)) => {
            let _ = tx.send(result);
        }
        None => log::debug!("response for unknown call id {id} (timed out?)"),
    }
}

fn resolve_pending_err(inner: &ChannelInner, id: u64, message: String) {
    let entry = {
        let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&id)
    };
    match entry {
        Some((event, tx)) => {
            let _ = tx.send(Err(SignalingError::Remote { event, message }));
        }
        None => log::debug!("error for unknown call id {id} (timed out?)"),
    }
}

fn fail_all_pending(inner: &ChannelInner) {
    let drained = {
        let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    };
    for (_, (_, tx)) in drained {
        let _ = tx.send(Err(SignalingError::ChannelClosed));
    }
}
