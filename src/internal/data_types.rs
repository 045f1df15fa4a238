use serde::{Deserialize, Serialize};

use crate::internal::signaling::SignalingRequest;
use crate::media::{MediaKind, MimeType};

/// uniquely identifies peers (server-issued)
pub type PeerId = String;
/// server-issued identifier of a published track
pub type ProducerId = String;
/// server-issued identifier of a subscription
pub type ConsumerId = String;
/// server-issued identifier of a webrtc transport
pub type TransportId = String;

/// one codec the sender or receiver side can handle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

impl RtpCodecCapability {
    pub fn kind(&self) -> Option<MediaKind> {
        MimeType::parse(&self.mime_type).map(|m| m.kind())
    }
}

/// the codec set negotiated between client and router
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// parameters a producer sends with, or a consumer receives with
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
}

/// server-side description of a freshly created webrtc transport
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub dtls_parameters: DtlsParameters,
}

/// a remote participant as announced by the server. `producer_ids` is only
/// populated in the join snapshot
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: PeerId,
    pub display_name: String,
    #[serde(default)]
    pub producer_ids: Vec<ProducerId>,
}

/// generic acknowledgment payload
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Ack {}

// requests, one struct per signaling event

/// answered out of band by a pushed `joined-room` notification, so this is
/// emitted rather than called
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub display_name: String,
}

impl SignalingRequest for JoinRoom {
    const EVENT: &'static str = "join-room";
    type Response = serde_json::Value;
}

#[derive(Serialize, Debug, Clone)]
pub struct GetRouterRtpCapabilities {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterRtpCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtp_capabilities: Option<RtpCapabilities>,
}

impl SignalingRequest for GetRouterRtpCapabilities {
    const EVENT: &'static str = "get-router-rtp-capabilities";
    type Response = RouterRtpCapabilities;
}

#[derive(Serialize, Debug, Clone)]
pub struct CreateWebrtcTransport {}

impl SignalingRequest for CreateWebrtcTransport {
    const EVENT: &'static str = "create-webrtc-transport";
    type Response = TransportOptions;
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

impl SignalingRequest for ConnectTransport {
    const EVENT: &'static str = "connect-transport";
    type Response = Ack;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProduceResponse {
    pub id: ProducerId,
}

impl SignalingRequest for Produce {
    const EVENT: &'static str = "produce";
    type Response = ProduceResponse;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Consume {
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

impl SignalingRequest for Consume {
    const EVENT: &'static str = "consume";
    type Response = ConsumeResponse;
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumer {
    pub consumer_id: ConsumerId,
}

impl SignalingRequest for ResumeConsumer {
    const EVENT: &'static str = "resume-consumer";
    type Response = Ack;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_payloads_use_camel_case() {
        let connect = ConnectTransport {
            transport_id: "t1".into(),
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Client,
                fingerprints: vec![],
            },
        };
        let value = serde_json::to_value(&connect).unwrap();
        assert!(value.get("transportId").is_some());
        assert!(value.get("dtlsParameters").is_some());
    }

    #[test]
    fn peer_info_defaults_missing_producer_ids() {
        let peer: PeerInfo =
            serde_json::from_value(serde_json::json!({"id": "p2", "displayName": "bob"})).unwrap();
        assert_eq!(peer.display_name, "bob");
        assert!(peer.producer_ids.is_empty());
    }

    #[test]
    fn codec_kind_follows_the_mime_type() {
        let opus = RtpCodecCapability {
            mime_type: "audio/opus".into(),
            clock_rate: 48000,
            channels: Some(2),
        };
        assert_eq!(opus.kind(), Some(MediaKind::Audio));
        let unknown = RtpCodecCapability {
            mime_type: "video/flv".into(),
            clock_rate: 90000,
            channels: None,
        };
        assert_eq!(unknown.kind(), None);
    }
}
