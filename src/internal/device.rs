use std::time::Duration;

use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use crate::error::SessionError;
use crate::internal::data_types::{
    DtlsFingerprint, DtlsParameters, DtlsRole, GetRouterRtpCapabilities, RtpCapabilities,
    RtpCodecCapability, RtpEncodingParameters, RtpParameters,
};
use crate::internal::signaling::SignalingChannel;
use crate::media::{self, MediaKind};

/// the negotiated local capability set. created once per session after the
/// first successful capability exchange, immutable afterwards
pub struct Device {
    rtp_capabilities: RtpCapabilities,
    dtls_parameters: DtlsParameters,
}

impl Device {
    /// capability exchange with the router. no retries - any failure here is
    /// fatal to the session attempt
    pub async fn load(
        channel: &SignalingChannel,
        call_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let response = channel
            .call(&GetRouterRtpCapabilities {}, call_timeout)
            .await?;
        let router = match response.rtp_capabilities {
            Some(capabilities) if !capabilities.codecs.is_empty() => capabilities,
            _ => return Err(SessionError::CapabilitiesUnavailable),
        };
        let negotiated = negotiate(&media::local_codecs(), &router);
        if negotiated.codecs.is_empty() {
            return Err(SessionError::IncompatibleDevice);
        }
        log::debug!(
            "device loaded with {} of {} router codecs",
            negotiated.codecs.len(),
            router.codecs.len()
        );
        Ok(Self {
            rtp_capabilities: negotiated,
            dtls_parameters: generate_dtls_parameters(),
        })
    }

    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.rtp_capabilities
    }

    pub fn dtls_parameters(&self) -> DtlsParameters {
        self.dtls_parameters.clone()
    }

    /// parameters for one outbound producer. video gets a single encoding
    /// layer with a bounded bitrate; audio sends with defaults
    pub fn producer_parameters(&self, kind: MediaKind, video_max_bitrate: u32) -> RtpParameters {
        let codecs = self
            .rtp_capabilities
            .codecs
            .iter()
            .filter(|codec| codec.kind() == Some(kind))
            .cloned()
            .collect();
        let encodings = match kind {
            MediaKind::Video => vec![RtpEncodingParameters {
                max_bitrate: Some(video_max_bitrate),
            }],
            MediaKind::Audio => Vec::new(),
        };
        RtpParameters { codecs, encodings }
    }
}

/// intersect the local codec table with the router's announcement. mime types
/// match case-insensitively, clock rates exactly; a codec that declares
/// channels on both sides must agree on them
fn negotiate(local: &[RTCRtpCodecCapability], router: &RtpCapabilities) -> RtpCapabilities {
    let codecs = local
        .iter()
        .filter_map(|ours| {
            router
                .codecs
                .iter()
                .find(|theirs| codec_match(ours, theirs))
                .map(|theirs| RtpCodecCapability {
                    mime_type: ours.mime_type.clone(),
                    clock_rate: ours.clock_rate,
                    channels: theirs.channels.or(match ours.channels {
                        0 => None,
                        n => Some(n),
                    }),
                })
        })
        .collect();
    RtpCapabilities { codecs }
}

fn codec_match(ours: &RTCRtpCodecCapability, theirs: &RtpCodecCapability) -> bool {
    if !ours.mime_type.eq_ignore_ascii_case(&theirs.mime_type) {
        return false;
    }
    if ours.clock_rate != theirs.clock_rate {
        return false;
    }
    match (ours.channels, theirs.channels) {
        (0, _) | (_, None) => true,
        (n, Some(m)) => n == m,
    }
}

fn generate_dtls_parameters() -> DtlsParameters {
    let digest: [u8; 32] = rand::random();
    let value = digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_owned(),
            value,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with(codecs: Vec<RtpCodecCapability>) -> RtpCapabilities {
        RtpCapabilities { codecs }
    }

    fn opus() -> RtpCodecCapability {
        RtpCodecCapability {
            mime_type: "audio/opus".into(),
            clock_rate: 48000,
            channels: Some(2),
        }
    }

    fn vp8() -> RtpCodecCapability {
        RtpCodecCapability {
            mime_type: "video/VP8".into(),
            clock_rate: 90000,
            channels: None,
        }
    }

    #[test]
    fn negotiation_keeps_the_common_codecs() {
        let negotiated = negotiate(&media::local_codecs(), &router_with(vec![opus(), vp8()]));
        let mimes: Vec<_> = negotiated.codecs.iter().map(|c| c.mime_type.as_str()).collect();
        assert_eq!(mimes, vec!["audio/opus", "video/VP8"]);
    }

    #[test]
    fn negotiation_matches_mime_types_case_insensitively() {
        let mut lowercase = vp8();
        lowercase.mime_type = "video/vp8".into();
        let negotiated = negotiate(&media::local_codecs(), &router_with(vec![lowercase]));
        assert_eq!(negotiated.codecs.len(), 1);
        // the local spelling wins so produced parameters stay consistent
        assert_eq!(negotiated.codecs[0].mime_type, "video/VP8");
    }

    #[test]
    fn negotiation_rejects_mismatched_clock_rates() {
        let mut wrong = vp8();
        wrong.clock_rate = 30000;
        let negotiated = negotiate(&media::local_codecs(), &router_with(vec![wrong]));
        assert!(negotiated.codecs.is_empty());
    }

    #[test]
    fn negotiation_rejects_mismatched_channel_counts() {
        let mut mono = opus();
        mono.channels = Some(1);
        let negotiated = negotiate(&media::local_codecs(), &router_with(vec![mono]));
        assert!(negotiated.codecs.is_empty());
    }

    #[test]
    fn producer_parameters_bound_video_bitrate() {
        let device = Device {
            rtp_capabilities: RtpCapabilities {
                codecs: vec![opus(), vp8()],
            },
            dtls_parameters: generate_dtls_parameters(),
        };
        let video = device.producer_parameters(MediaKind::Video, 900_000);
        assert_eq!(video.codecs.len(), 1);
        assert_eq!(video.encodings.len(), 1);
        assert_eq!(video.encodings[0].max_bitrate, Some(900_000));
        let audio = device.producer_parameters(MediaKind::Audio, 900_000);
        assert!(audio.encodings.is_empty());
    }

    #[test]
    fn dtls_fingerprints_look_like_fingerprints() {
        let parameters = generate_dtls_parameters();
        assert_eq!(parameters.fingerprints.len(), 1);
        assert_eq!(parameters.fingerprints[0].algorithm, "sha-256");
        assert_eq!(parameters.fingerprints[0].value.len(), 32 * 3 - 1);
    }
}
