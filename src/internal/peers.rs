use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::internal::data_types::PeerId;
use crate::media::RemoteTrack;

/// aggregate of one remote peer's tracks. replaced wholesale on every change,
/// never mutated in place, so observers can rely on `Arc` pointer identity to
/// detect updates
#[derive(Debug)]
pub struct MediaStream {
    pub id: Uuid,
    pub tracks: Vec<RemoteTrack>,
}

impl MediaStream {
    pub(crate) fn empty() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            tracks: Vec::new(),
        })
    }
}

/// a remote participant as exposed to the observer
#[derive(Clone, Debug)]
pub struct RemotePeer {
    pub id: PeerId,
    pub display_name: String,
    pub stream: Arc<MediaStream>,
}

/// display name for peers learned about through one of their producers before
/// any `new-peer`/snapshot entry arrived
pub(crate) fn fallback_display_name(id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("peer-{short}")
}

/// insert the peer if absent; returns true when a new entry was created. the
/// entry survives unchanged when both the snapshot and a `new-peer` announce
/// the same identifier
pub(crate) fn ensure_peer(
    peers: &mut HashMap<PeerId, RemotePeer>,
    id: &str,
    display_name: Option<&str>,
) -> bool {
    if peers.contains_key(id) {
        return false;
    }
    peers.insert(
        id.to_owned(),
        RemotePeer {
            id: id.to_owned(),
            display_name: display_name
                .map(str::to_owned)
                .unwrap_or_else(|| fallback_display_name(id)),
            stream: MediaStream::empty(),
        },
    );
    true
}

/// attach a consumer track to the owning peer, creating the peer if needed
/// and replacing its stream object with a fresh one
pub(crate) fn attach_track(
    peers: &mut HashMap<PeerId, RemotePeer>,
    peer_id: &str,
    track: RemoteTrack,
) {
    ensure_peer(peers, peer_id, None);
    if let Some(peer) = peers.get_mut(peer_id) {
        if peer.stream.tracks.iter().any(|t| t.id == track.id) {
            log::debug!("track {} already attached to peer {peer_id}", track.id);
            return;
        }
        let mut tracks = peer.stream.tracks.clone();
        tracks.push(track);
        peer.stream = Arc::new(MediaStream {
            id: Uuid::new_v4(),
            tracks,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    fn track(id: &str) -> RemoteTrack {
        RemoteTrack {
            id: id.to_owned(),
            kind: MediaKind::Audio,
        }
    }

    #[test]
    fn ensure_peer_never_duplicates() {
        let mut peers = HashMap::new();
        assert!(ensure_peer(&mut peers, "p2", Some("bob")));
        assert!(!ensure_peer(&mut peers, "p2", Some("robert")));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["p2"].display_name, "bob");
    }

    #[test]
    fn synthesized_peers_get_a_fallback_name() {
        let mut peers = HashMap::new();
        ensure_peer(&mut peers, "abcdefgh-1234", None);
        assert_eq!(peers["abcdefgh-1234"].display_name, "peer-abcdefgh");
    }

    #[test]
    fn attaching_replaces_the_stream_object() {
        let mut peers = HashMap::new();
        ensure_peer(&mut peers, "p2", Some("bob"));
        let before = peers["p2"].stream.clone();
        attach_track(&mut peers, "p2", track("c1"));
        let after = peers["p2"].stream.clone();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.tracks.len(), 1);
    }

    #[test]
    fn attaching_to_an_unknown_peer_synthesizes_it() {
        let mut peers = HashMap::new();
        attach_track(&mut peers, "p9", track("c1"));
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["p9"].stream.tracks.len(), 1);
    }

    #[test]
    fn duplicate_track_ids_attach_once() {
        let mut peers = HashMap::new();
        attach_track(&mut peers, "p2", track("c1"));
        attach_track(&mut peers, "p2", track("c1"));
        attach_track(&mut peers, "p2", track("c2"));
        assert_eq!(peers["p2"].stream.tracks.len(), 2);
    }
}
