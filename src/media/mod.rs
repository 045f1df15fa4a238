use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// kind of a media track, as it appears in the signaling contract
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

/// represents the MIME types this client is prepared to negotiate
#[allow(clippy::upper_case_acronyms)]
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    // https://en.wikipedia.org/wiki/Opus_(audio_format)
    // lossy audio coding format
    // BSD-3 license
    #[display(fmt = "{MIME_TYPE_OPUS}")]
    OPUS,
    // https://en.wikipedia.org/wiki/VP8
    // royalty-free video compression format
    #[display(fmt = "{MIME_TYPE_VP8}")]
    VP8,
    // https://en.wikipedia.org/wiki/VP9
    // royalty-free video coding format
    #[display(fmt = "{MIME_TYPE_VP9}")]
    VP9,
    // https://en.wikipedia.org/wiki/Advanced_Video_Coding
    // the most popular video compression standard
    #[display(fmt = "{MIME_TYPE_H264}")]
    H264,
}

impl MimeType {
    /// matching is case insensitive, per the MIME registrations
    pub fn parse(s: &str) -> Option<Self> {
        let mime_type = if s.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            MimeType::OPUS
        } else if s.eq_ignore_ascii_case(MIME_TYPE_VP8) {
            MimeType::VP8
        } else if s.eq_ignore_ascii_case(MIME_TYPE_VP9) {
            MimeType::VP9
        } else if s.eq_ignore_ascii_case(MIME_TYPE_H264) {
            MimeType::H264
        } else {
            return None;
        };
        Some(mime_type)
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            MimeType::OPUS => MediaKind::Audio,
            MimeType::VP8 | MimeType::VP9 | MimeType::H264 => MediaKind::Video,
        }
    }
}

/// the codecs offered during capability negotiation. fmtp lines mirror the
/// defaults the webrtc media engine registers for these codecs
pub(crate) fn local_codecs() -> Vec<RTCRtpCodecCapability> {
    vec![
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP9.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: "profile-id=0".to_owned(),
            rtcp_feedback: vec![],
        },
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f".to_owned(),
            rtcp_feedback: vec![],
        },
    ]
}

/// a local capture track handed to [`crate::Session::publish`]. capturing
/// audio/video is the caller's responsibility; this handle only carries
/// identity, kind and an end signal
#[derive(Clone, Debug)]
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    ended: watch::Receiver<bool>,
}

/// capture side of a [`LocalTrack`]. ending it (or dropping it) closes the
/// producer publishing the track
#[derive(Debug)]
pub struct LocalTrackHandle {
    ended: watch::Sender<bool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind) -> (Self, LocalTrackHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                id: Uuid::new_v4().to_string(),
                kind,
                ended: rx,
            },
            LocalTrackHandle { ended: tx },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// resolves once the capture side ended or dropped the track
    pub(crate) async fn ended(&self) {
        let mut rx = self.ended.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl LocalTrackHandle {
    pub fn end(&self) {
        let _ = self.ended.send(true);
    }
}

/// one inbound remote track forwarded by the SFU. the id is the server-issued
/// consumer id, so ids stay distinct across a peer's aggregate stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_type_parsing_is_case_insensitive() {
        assert_eq!(MimeType::parse("audio/opus"), Some(MimeType::OPUS));
        assert_eq!(MimeType::parse("AUDIO/OPUS"), Some(MimeType::OPUS));
        assert_eq!(MimeType::parse("video/vp8"), Some(MimeType::VP8));
        assert_eq!(MimeType::parse("video/flv"), None);
    }

    #[test]
    fn mime_type_round_trips_through_display() {
        for mime in [MimeType::OPUS, MimeType::VP8, MimeType::VP9, MimeType::H264] {
            assert_eq!(MimeType::parse(&mime.to_string()), Some(mime));
        }
    }

    #[tokio::test]
    async fn local_track_reports_end_of_capture() {
        let (track, handle) = LocalTrack::new(MediaKind::Audio);
        handle.end();
        track.ended().await;
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_track() {
        let (track, handle) = LocalTrack::new(MediaKind::Video);
        drop(handle);
        track.ended().await;
    }
}
