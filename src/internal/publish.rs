use std::collections::{HashMap, HashSet};

use crate::internal::data_types::ProducerId;
use crate::media::{LocalTrack, MediaKind};

/// one local outbound track bound to the send transport
#[derive(Debug)]
pub struct Producer {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub track_id: String,
}

impl Producer {
    pub fn close(self) {
        log::debug!("closed {} producer {}", self.kind, self.id);
    }
}

/// registry of local publications. at most one audio and one video producer
/// at a time; the published set makes `publish` idempotent across repeated
/// invocations with an unchanged track set
#[derive(Default)]
pub struct Publications {
    producers: HashMap<MediaKind, Producer>,
    published: HashSet<String>,
}

impl Publications {
    /// reserve a slot for the track. returns false when the track is already
    /// published (a repeat publish is a no-op). replacing a track of the same
    /// kind closes the prior producer
    pub fn claim(&mut self, track: &LocalTrack) -> bool {
        if !self.published.insert(track.id().to_owned()) {
            return false;
        }
        if let Some(prior) = self.producers.remove(&track.kind()) {
            log::info!("replacing {} producer {}", prior.kind, prior.id);
            self.published.remove(&prior.track_id);
            prior.close();
        }
        true
    }

    /// give up a claim after a failed produce so the track can be retried
    pub fn release(&mut self, track_id: &str) {
        self.published.remove(track_id);
    }

    pub fn register(&mut self, producer: Producer) {
        if let Some(prior) = self.producers.insert(producer.kind, producer) {
            // two same-kind publishes raced; the later registration wins
            log::warn!("displacing {} producer {}", prior.kind, prior.id);
            self.published.remove(&prior.track_id);
            prior.close();
        }
    }

    /// drop the producer owning this track, if any. used when the local
    /// capture side ends the track
    pub fn remove_by_track(&mut self, track_id: &str) -> Option<Producer> {
        let kind = self
            .producers
            .values()
            .find(|p| p.track_id == track_id)
            .map(|p| p.kind)?;
        self.published.remove(track_id);
        self.producers.remove(&kind)
    }

    pub fn close_all(&mut self) {
        self.published.clear();
        for (_, producer) in self.producers.drain() {
            producer.close();
        }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }
}
