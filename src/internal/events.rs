use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::internal::data_types::{PeerId, PeerInfo, ProducerId};

/// client -> server envelope. `id` is present for request/response calls and
/// absent for fire-and-forget events
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// server -> client envelope. notifications stay untyped here; the channel
/// decodes them into [`ServerEvent`] and drops names it does not know
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerFrame {
    Response {
        id: u64,
        #[serde(default)]
        data: Value,
    },
    Error {
        id: u64,
        message: String,
    },
    Notification {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// out-of-band push notifications from the server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// answers a `join-room` emit; carries the local identity and the room
    /// snapshot
    #[serde(rename_all = "camelCase")]
    JoinedRoom {
        peer_id: PeerId,
        peers: Vec<PeerInfo>,
    },
    #[serde(rename_all = "camelCase")]
    NewProducer {
        producer_id: ProducerId,
        peer_id: PeerId,
    },
    NewPeer {
        peer: PeerInfo,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        peer_id: PeerId,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::JoinedRoom { .. } => "joined-room",
            ServerEvent::NewProducer { .. } => "new-producer",
            ServerEvent::NewPeer { .. } => "new-peer",
            ServerEvent::PeerLeft { .. } => "peer-left",
        }
    }

    /// decode a notification frame's name + payload
    pub(crate) fn from_wire(event: &str, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "event": event, "data": data }))
    }

    /// wrap into the wire envelope
    pub(crate) fn into_frame(self) -> ServerFrame {
        let event = self.name().to_owned();
        let data = match serde_json::to_value(&self) {
            Ok(Value::Object(mut fields)) => fields.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        ServerFrame::Notification { event, data }
    }
}
