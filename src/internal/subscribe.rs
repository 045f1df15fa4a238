use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::internal::data_types::{ConsumerId, PeerId, ProducerId, ResumeConsumer};
use crate::internal::peers;
use crate::media::{MediaKind, RemoteTrack};
use crate::Shared;

/// one inbound remote track bound to the recv transport
#[derive(Debug)]
pub struct Consumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub peer_id: PeerId,
    pub kind: MediaKind,
}

impl Consumer {
    pub fn close(self) {
        log::debug!("closed {} consumer {} (peer {})", self.kind, self.id, self.peer_id);
    }
}

/// registry of inbound subscriptions, keyed by server-issued consumer id
#[derive(Default)]
pub struct Subscriptions {
    consumers: HashMap<ConsumerId, Consumer>,
    /// producer ids a consume was already started for. dedupes the snapshot
    /// against `new-producer` notifications racing in for the same producer
    consumed_producers: HashSet<ProducerId>,
}

impl Subscriptions {
    /// returns false when a consume for this producer is already underway
    pub fn claim_producer(&mut self, producer_id: &str) -> bool {
        self.consumed_producers.insert(producer_id.to_owned())
    }

    /// give up a claim after a failed consume
    pub fn release_producer(&mut self, producer_id: &str) {
        self.consumed_producers.remove(producer_id);
    }

    pub fn register(&mut self, consumer: Consumer) {
        if let Some(prior) = self.consumers.insert(consumer.id.clone(), consumer) {
            log::warn!("displacing consumer {}", prior.id);
            prior.close();
        }
    }

    /// detach everything owned by the departing peer
    pub fn remove_for_peer(&mut self, peer_id: &str) -> Vec<Consumer> {
        let ids: Vec<ConsumerId> = self
            .consumers
            .values()
            .filter(|c| c.peer_id == peer_id)
            .map(|c| c.id.clone())
            .collect();
        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(consumer) = self.consumers.remove(&id) {
                self.consumed_producers.remove(&consumer.producer_id);
                removed.push(consumer);
            }
        }
        removed
    }

    pub fn close_all(&mut self) {
        self.consumed_producers.clear();
        for (_, consumer) in self.consumers.drain() {
            consumer.close();
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }
}

/// consume one remote producer: request the consumer, commit it to the
/// registry and the owning peer's stream, then resume it. runs as its own
/// task; consumes for different producer ids proceed fully in parallel
pub(crate) async fn consume(shared: Arc<Shared>, producer_id: ProducerId, peer_id: PeerId) {
    // snapshot the handles up front; the round trips below must not hold the
    // registry lock
    let (channel, transport, capabilities) = {
        let inner = shared.inner.lock().await;
        match (
            inner.channel.clone(),
            inner.recv_transport.clone(),
            inner.device.clone(),
        ) {
            (Some(channel), Some(transport), Some(device)) => {
                (channel, transport, device.rtp_capabilities().clone())
            }
            // torn down before the consume started
            _ => return,
        }
    };

    let response = match transport.consume(&producer_id, &capabilities).await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("failed to consume producer {producer_id} from {peer_id}: {e}");
            let mut inner = shared.inner.lock().await;
            inner.subscriptions.release_producer(&producer_id);
            return;
        }
    };

    let consumer_id = response.id.clone();
    let track = RemoteTrack {
        id: response.id.clone(),
        kind: response.kind,
    };
    {
        let mut inner = shared.inner.lock().await;
        if !shared.live.load(Ordering::SeqCst) {
            log::debug!("dropping consumer {consumer_id} resolved after teardown");
            return;
        }
        inner.subscriptions.register(Consumer {
            id: response.id,
            producer_id: response.producer_id,
            peer_id: peer_id.clone(),
            kind: response.kind,
        });
        // the peer entry exists before (or here, atomically with) the track
        // attaching; the stream object is replaced, not mutated
        shared
            .state
            .send_modify(|state| peers::attach_track(&mut state.peers, &peer_id, track));
    }
    log::info!("consuming {} producer {producer_id} from {peer_id} as {consumer_id}", response.kind);

    // the server starts consumers paused. a failed resume is retried once,
    // then logged and the consumer kept - it may still resume out of band
    let attempts = shared.config.resume_retries + 1;
    for attempt in 1..=attempts {
        match channel
            .call(
                &ResumeConsumer {
                    consumer_id: consumer_id.clone(),
                },
                shared.config.call_timeout,
            )
            .await
        {
            Ok(_) => return,
            Err(e) => {
                log::warn!("resume-consumer {consumer_id} attempt {attempt}/{attempts} failed: {e}")
            }
        }
    }
    log::warn!("keeping consumer {consumer_id} without a resume acknowledgment");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer(id: &str, producer_id: &str, peer_id: &str) -> Consumer {
        Consumer {
            id: id.to_owned(),
            producer_id: producer_id.to_owned(),
            peer_id: peer_id.to_owned(),
            kind: MediaKind::Video,
        }
    }

    #[test]
    fn producer_claims_dedupe_snapshot_and_push() {
        let mut subscriptions = Subscriptions::default();
        assert!(subscriptions.claim_producer("prod1"));
        assert!(!subscriptions.claim_producer("prod1"));
        subscriptions.release_producer("prod1");
        assert!(subscriptions.claim_producer("prod1"));
    }

    #[test]
    fn remove_for_peer_only_touches_that_peer() {
        let mut subscriptions = Subscriptions::default();
        subscriptions.claim_producer("prod1");
        subscriptions.claim_producer("prod2");
        subscriptions.claim_producer("prod3");
        subscriptions.register(consumer("c1", "prod1", "p2"));
        subscriptions.register(consumer("c2", "prod2", "p2"));
        subscriptions.register(consumer("c3", "prod3", "p3"));

        let removed = subscriptions.remove_for_peer("p2");
        assert_eq!(removed.len(), 2);
        assert_eq!(subscriptions.len(), 1);
        // the departed peer's producers may be consumed again if it returns
        assert!(subscriptions.claim_producer("prod1"));
        assert!(!subscriptions.claim_producer("prod3"));
    }

    #[test]
    fn close_all_empties_the_registry() {
        let mut subscriptions = Subscriptions::default();
        subscriptions.claim_producer("prod1");
        subscriptions.register(consumer("c1", "prod1", "p2"));
        subscriptions.close_all();
        assert_eq!(subscriptions.len(), 0);
    }
}
