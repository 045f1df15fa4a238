use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::internal::data_types::{
    Consume, DtlsFingerprint, DtlsParameters, DtlsRole, IceParameters, PeerInfo, Produce,
    ProducerId, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportOptions,
};
use crate::internal::events::{ClientFrame, ServerEvent, ServerFrame};
use crate::media::MediaKind;

// testing
// the session requires a signaling endpoint to negotiate against. this
// in-process server speaks the same websocket contract as a real SFU's
// signaling layer, with scriptable behavior per event: drop an event to
// force a timeout, fail one to exercise error paths, push notifications
// mid-session, and read back the log of received events.

/// behavior of a [`TestSfu`] instance
#[derive(Clone, Debug)]
pub struct TestSfuConfig {
    /// identity assigned to the joining client
    pub local_peer_id: String,
    /// snapshot returned in the joined-room notification
    pub peers: Vec<PeerInfo>,
    /// router capabilities; `None` simulates a router with nothing to offer
    pub router_capabilities: Option<RtpCapabilities>,
    /// kind of each producer the server knows about, for consume responses
    pub producers: HashMap<ProducerId, MediaKind>,
    /// events the server silently ignores, so calls for them time out
    pub drop_events: HashSet<String>,
    /// events answered with an error frame instead of a response
    pub fail_events: HashMap<String, String>,
    /// notifications delivered immediately before the joined-room push,
    /// simulating pushes that win the race against the join response
    pub pre_join_events: Vec<ServerEvent>,
}

impl Default for TestSfuConfig {
    fn default() -> Self {
        Self {
            local_peer_id: "p1".to_owned(),
            peers: Vec::new(),
            router_capabilities: Some(default_router_capabilities()),
            producers: HashMap::new(),
            drop_events: HashSet::new(),
            fail_events: HashMap::new(),
            pre_join_events: Vec::new(),
        }
    }
}

/// capabilities a typical router would announce
pub fn default_router_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability {
                mime_type: "audio/opus".to_owned(),
                clock_rate: 48000,
                channels: Some(2),
            },
            RtpCodecCapability {
                mime_type: "video/VP8".to_owned(),
                clock_rate: 90000,
                channels: None,
            },
        ],
    }
}

struct SfuShared {
    config: TestSfuConfig,
    producers: Mutex<HashMap<ProducerId, MediaKind>>,
    received: Mutex<Vec<String>>,
    push_tx: Mutex<Option<mpsc::UnboundedSender<ServerFrame>>>,
}

/// in-process SFU signaling stub for tests and demos
pub struct TestSfu {
    addr: SocketAddr,
    shared: Arc<SfuShared>,
}

impl TestSfu {
    pub async fn spawn(config: TestSfuConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(SfuShared {
            producers: Mutex::new(config.producers.clone()),
            config,
            received: Mutex::new(Vec::new()),
            push_tx: Mutex::new(None),
        });
        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(shared, stream).await {
                        log::debug!("test sfu client ended: {e}");
                    }
                });
            }
        });
        Ok(Self { addr, shared })
    }

    /// websocket url clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// push a notification to the connected client. returns false when no
    /// client is connected
    pub fn push(&self, event: ServerEvent) -> bool {
        let push_tx = self.shared.push_tx.lock().unwrap_or_else(|e| e.into_inner());
        match &*push_tx {
            Some(tx) => tx.send(event.into_frame()).is_ok(),
            None => false,
        }
    }

    /// register a producer after spawn, so later pushes can reference it
    pub fn add_producer(&self, producer_id: impl Into<ProducerId>, kind: MediaKind) {
        let mut producers = self
            .shared
            .producers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        producers.insert(producer_id.into(), kind);
    }

    /// event names received so far, in arrival order
    pub fn received_events(&self) -> Vec<String> {
        self.shared
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

async fn handle_client(shared: Arc<SfuShared>, stream: TcpStream) -> Result<()> {
    let websocket = accept_async(stream).await?;
    let (mut sink, mut source) = websocket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    {
        let mut push_tx = shared.push_tx.lock().unwrap_or_else(|e| e.into_inner());
        *push_tx = Some(out_tx.clone());
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("failed to encode server frame: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        let message = message?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("test sfu received a malformed frame: {e}");
                continue;
            }
        };
        {
            let mut received = shared.received.lock().unwrap_or_else(|e| e.into_inner());
            received.push(frame.event.clone());
        }
        if shared.config.drop_events.contains(&frame.event) {
            log::debug!("test sfu dropping '{}' on purpose", frame.event);
            continue;
        }
        if let Some(message) = shared.config.fail_events.get(&frame.event) {
            if let Some(id) = frame.id {
                let _ = out_tx.send(ServerFrame::Error {
                    id,
                    message: message.clone(),
                });
            }
            continue;
        }
        answer(&shared, &out_tx, frame)?;
    }

    writer.abort();
    Ok(())
}

fn answer(
    shared: &Arc<SfuShared>,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    frame: ClientFrame,
) -> Result<()> {
    let respond = |data: Value| {
        if let Some(id) = frame.id {
            let _ = out_tx.send(ServerFrame::Response { id, data });
        }
    };
    match frame.event.as_str() {
        "join-room" => {
            for event in shared.config.pre_join_events.clone() {
                let _ = out_tx.send(event.into_frame());
            }
            let joined = ServerEvent::JoinedRoom {
                peer_id: shared.config.local_peer_id.clone(),
                peers: shared.config.peers.clone(),
            };
            let _ = out_tx.send(joined.into_frame());
        }
        "get-router-rtp-capabilities" => {
            let data = match &shared.config.router_capabilities {
                Some(capabilities) => json!({ "rtpCapabilities": capabilities }),
                None => json!({}),
            };
            respond(data);
        }
        "create-webrtc-transport" => {
            let options = TransportOptions {
                id: format!("transport-{}", Uuid::new_v4()),
                ice_parameters: IceParameters {
                    username_fragment: Uuid::new_v4().to_string(),
                    password: Uuid::new_v4().to_string(),
                },
                dtls_parameters: DtlsParameters {
                    role: DtlsRole::Server,
                    fingerprints: vec![DtlsFingerprint {
                        algorithm: "sha-256".to_owned(),
                        value: "00".to_owned(),
                    }],
                },
            };
            respond(serde_json::to_value(options)?);
        }
        "connect-transport" => respond(json!({})),
        "produce" => {
            let request: Produce = serde_json::from_value(frame.data)?;
            let id = format!("producer-{}", Uuid::new_v4());
            let mut producers = shared.producers.lock().unwrap_or_else(|e| e.into_inner());
            producers.insert(id.clone(), request.kind);
            respond(json!({ "id": id }));
        }
        "consume" => {
            let request: Consume = serde_json::from_value(frame.data)?;
            let kind = {
                let producers = shared.producers.lock().unwrap_or_else(|e| e.into_inner());
                match producers.get(&request.producer_id) {
                    Some(kind) => *kind,
                    None => {
                        log::warn!(
                            "consume for unknown producer {}; assuming audio",
                            request.producer_id
                        );
                        MediaKind::Audio
                    }
                }
            };
            let consumer_id = format!("consumer-{}", Uuid::new_v4());
            respond(json!({
                "id": consumer_id,
                "producerId": request.producer_id,
                "kind": kind,
                "rtpParameters": RtpParameters::default(),
            }));
        }
        "resume-consumer" => respond(json!({})),
        other => {
            log::warn!("test sfu received unknown event '{other}'");
            if let Some(id) = frame.id {
                let _ = out_tx.send(ServerFrame::Error {
                    id,
                    message: format!("unknown event '{other}'"),
                });
            }
        }
    }
    Ok(())
}
