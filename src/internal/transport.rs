use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use derive_more::Display;
use tokio::sync::Mutex;

use crate::error::SessionError;
use crate::internal::data_types::{
    ConnectTransport, Consume, ConsumeResponse, CreateWebrtcTransport, DtlsParameters, Produce,
    ProducerId, RtpCapabilities, RtpParameters, TransportId,
};
use crate::internal::device::Device;
use crate::internal::signaling::SignalingChannel;
use crate::media::MediaKind;

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDirection {
    #[display(fmt = "send")]
    Send,
    #[display(fmt = "recv")]
    Recv,
}

/// one logical webrtc transport towards the SFU. a session owns exactly two:
/// one for sending local media, one for receiving remote media
pub struct Transport {
    id: TransportId,
    direction: TransportDirection,
    channel: SignalingChannel,
    dtls_parameters: DtlsParameters,
    call_timeout: Duration,
    /// true once the connect handshake completed
    connected: Mutex<bool>,
    closed: AtomicBool,
}

impl Transport {
    pub async fn create(
        channel: &SignalingChannel,
        device: &Device,
        direction: TransportDirection,
        call_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let options = channel.call(&CreateWebrtcTransport {}, call_timeout).await?;
        log::debug!(
            "created {direction} transport {} (ice ufrag {})",
            options.id,
            options.ice_parameters.username_fragment
        );
        Ok(Self {
            id: options.id,
            direction,
            channel: channel.clone(),
            dtls_parameters: device.dtls_parameters(),
            call_timeout,
            connected: Mutex::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// dtls handshake with the router. runs at most once, lazily, on the
    /// first produce/consume attempt. a failure aborts that attempt and
    /// leaves the transport unconnected so the next attempt retries
    async fn ensure_connected(&self) -> Result<(), SessionError> {
        let mut connected = self.connected.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::TransportClosed);
        }
        if *connected {
            return Ok(());
        }
        self.channel
            .call(
                &ConnectTransport {
                    transport_id: self.id.clone(),
                    dtls_parameters: self.dtls_parameters.clone(),
                },
                self.call_timeout,
            )
            .await?;
        *connected = true;
        log::debug!("{} transport {} connected", self.direction, self.id);
        Ok(())
    }

    /// announce one outbound track; resolves with the server-issued producer
    /// id. send transport only
    pub async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SessionError> {
        debug_assert_eq!(self.direction, TransportDirection::Send);
        self.ensure_connected().await?;
        let response = self
            .channel
            .call(
                &Produce {
                    transport_id: self.id.clone(),
                    kind,
                    rtp_parameters,
                },
                self.call_timeout,
            )
            .await?;
        Ok(response.id)
    }

    /// request a consumer for a remote producer. recv transport only
    pub async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumeResponse, SessionError> {
        debug_assert_eq!(self.direction, TransportDirection::Recv);
        self.ensure_connected().await?;
        let response = self
            .channel
            .call(
                &Consume {
                    transport_id: self.id.clone(),
                    producer_id: producer_id.to_owned(),
                    rtp_capabilities: rtp_capabilities.clone(),
                },
                self.call_timeout,
            )
            .await?;
        Ok(response)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("closed {} transport {}", self.direction, self.id);
        }
    }
}
