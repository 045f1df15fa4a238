#![cfg(feature = "test-server")]

use std::collections::HashMap;
use std::time::Duration;

use sfu_client::testing::{TestSfu, TestSfuConfig};
use sfu_client::{
    LocalTrack, MediaKind, PeerInfo, RoomState, RtpCapabilities, RtpCodecCapability, ServerEvent,
    Session, SessionConfig, SessionError, SessionStatus, SignalingError,
};
use tokio::sync::watch;

fn config_for(server: &TestSfu) -> SessionConfig {
    let mut config = SessionConfig::new(server.url(), "r1", "alice");
    config.connect_timeout = Duration::from_secs(2);
    config.call_timeout = Duration::from_millis(500);
    config
}

fn peer(id: &str, display_name: &str, producer_ids: &[&str]) -> PeerInfo {
    PeerInfo {
        id: id.to_owned(),
        display_name: display_name.to_owned(),
        producer_ids: producer_ids.iter().map(|s| s.to_string()).collect(),
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<RoomState>,
    what: &str,
    predicate: impl Fn(&RoomState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if predicate(&current) {
                    return;
                }
            }
            rx.changed().await.expect("room state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

// scenario A: join an empty room
#[tokio::test]
async fn joining_an_empty_room_connects_with_no_peers() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    let state = session.watch();
    assert_eq!(state.borrow().status, SessionStatus::Idle);

    session.join().await.unwrap();

    let current = state.borrow();
    assert_eq!(current.status, SessionStatus::Connected);
    assert!(current.peers.is_empty());
    assert!(current.error.is_none());
    drop(current);
    assert_eq!(session.local_peer_id().as_deref(), Some("p1"));
    let stats = session.stats().await;
    assert_eq!(stats.transports, 2);
}

// scenario B: a peer joins and publishes after the session connected
#[tokio::test]
async fn peers_announced_after_join_show_up_with_their_tracks() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    server.add_producer("prod1", MediaKind::Video);
    assert!(server.push(ServerEvent::NewPeer {
        peer: peer("p2", "bob", &[]),
    }));
    assert!(server.push(ServerEvent::NewProducer {
        producer_id: "prod1".to_owned(),
        peer_id: "p2".to_owned(),
    }));

    let mut state = session.watch();
    wait_for(&mut state, "bob's track", |s| {
        s.peers.get("p2").map(|p| p.stream.tracks.len()) == Some(1)
    })
    .await;
    let current = state.borrow();
    assert_eq!(current.peers.len(), 1);
    assert_eq!(current.peers["p2"].display_name, "bob");
    assert_eq!(current.peers["p2"].stream.tracks[0].kind, MediaKind::Video);
}

// scenario C: snapshot with two producers, plus a racing duplicate new-peer
#[tokio::test]
async fn snapshot_producers_are_consumed_without_duplicating_the_peer() {
    let config = TestSfuConfig {
        peers: vec![peer("p2", "bob", &["prod1", "prod2"])],
        producers: HashMap::from([
            ("prod1".to_owned(), MediaKind::Audio),
            ("prod2".to_owned(), MediaKind::Video),
        ]),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    // a concurrent new-peer for the same identifier must not duplicate it
    assert!(server.push(ServerEvent::NewPeer {
        peer: peer("p2", "bob", &[]),
    }));

    let mut state = session.watch();
    wait_for(&mut state, "both snapshot tracks", |s| {
        s.peers.get("p2").map(|p| p.stream.tracks.len()) == Some(2)
    })
    .await;
    let current = state.borrow();
    assert_eq!(current.peers.len(), 1);
    let tracks = &current.peers["p2"].stream.tracks;
    assert_ne!(tracks[0].id, tracks[1].id);
}

// pushes delivered before the join response resolves are buffered, not lost,
// and cannot duplicate snapshot peers or producers
#[tokio::test]
async fn pushes_racing_the_join_response_do_not_duplicate_state() {
    let config = TestSfuConfig {
        peers: vec![peer("p2", "bob", &["prod1"])],
        producers: HashMap::from([("prod1".to_owned(), MediaKind::Audio)]),
        pre_join_events: vec![
            ServerEvent::NewPeer {
                peer: peer("p2", "bob", &[]),
            },
            ServerEvent::NewProducer {
                producer_id: "prod1".to_owned(),
                peer_id: "p2".to_owned(),
            },
        ],
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let mut state = session.watch();
    wait_for(&mut state, "bob's track", |s| {
        s.peers.get("p2").map(|p| p.stream.tracks.len()) == Some(1)
    })
    .await;
    // give a racing duplicate consume a chance to surface before checking
    tokio::time::sleep(Duration::from_millis(100)).await;
    let current = state.borrow();
    assert_eq!(current.peers.len(), 1);
    assert_eq!(current.peers["p2"].stream.tracks.len(), 1);
    drop(current);
    assert_eq!(session.stats().await.consumers, 1);
}

// a producer announcement may beat the new-peer broadcast; the peer is
// synthesized with a fallback display name
#[tokio::test]
async fn producers_from_unknown_peers_synthesize_the_peer() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    server.add_producer("prod1", MediaKind::Audio);
    assert!(server.push(ServerEvent::NewProducer {
        producer_id: "prod1".to_owned(),
        peer_id: "p2-abcdef".to_owned(),
    }));

    let mut state = session.watch();
    wait_for(&mut state, "synthesized peer", |s| {
        s.peers.get("p2-abcdef").map(|p| p.stream.tracks.len()) == Some(1)
    })
    .await;
    assert_eq!(state.borrow().peers["p2-abcdef"].display_name, "peer-p2-abcde");
}

// scenario D: peer-left closes its consumers and removes the entry
#[tokio::test]
async fn departing_peers_are_removed_with_their_consumers() {
    let config = TestSfuConfig {
        peers: vec![peer("p2", "bob", &["prod1", "prod2"])],
        producers: HashMap::from([
            ("prod1".to_owned(), MediaKind::Audio),
            ("prod2".to_owned(), MediaKind::Video),
        ]),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let mut state = session.watch();
    wait_for(&mut state, "both snapshot tracks", |s| {
        s.peers.get("p2").map(|p| p.stream.tracks.len()) == Some(2)
    })
    .await;
    assert_eq!(session.stats().await.consumers, 2);

    assert!(server.push(ServerEvent::PeerLeft {
        peer_id: "p2".to_owned(),
    }));
    wait_for(&mut state, "p2 to disappear", |s| s.peers.is_empty()).await;
    assert_eq!(session.stats().await.consumers, 0);
    assert_eq!(state.borrow().status, SessionStatus::Connected);
}

// scenario E: a transport creation timeout fails the whole attempt cleanly
#[tokio::test]
async fn transport_creation_timeout_fails_the_session() {
    let config = TestSfuConfig {
        drop_events: ["create-webrtc-transport".to_owned()].into(),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));

    let err = session.join().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Signaling(SignalingError::CallTimeout { .. })
    ));
    let state = session.watch();
    assert_eq!(state.borrow().status, SessionStatus::Error);
    assert!(state.borrow().error.is_some());
    let stats = session.stats().await;
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.transports, 0);
}

#[tokio::test]
async fn a_router_without_capabilities_is_fatal() {
    let config = TestSfuConfig {
        router_capabilities: None,
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));

    let err = session.join().await.unwrap_err();
    assert!(matches!(err, SessionError::CapabilitiesUnavailable));
    assert_eq!(session.watch().borrow().status, SessionStatus::Error);
}

#[tokio::test]
async fn disjoint_codec_sets_fail_device_load() {
    let config = TestSfuConfig {
        router_capabilities: Some(RtpCapabilities {
            codecs: vec![RtpCodecCapability {
                mime_type: "audio/EVS".to_owned(),
                clock_rate: 16000,
                channels: Some(1),
            }],
        }),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));

    let err = session.join().await.unwrap_err();
    assert!(matches!(err, SessionError::IncompatibleDevice));
    assert_eq!(session.watch().borrow().status, SessionStatus::Error);
}

#[tokio::test]
async fn server_rejections_during_connect_are_fatal() {
    let config = TestSfuConfig {
        fail_events: HashMap::from([(
            "create-webrtc-transport".to_owned(),
            "router is full".to_owned(),
        )]),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));

    let err = session.join().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Signaling(SignalingError::Remote { .. })
    ));
    let state = session.watch();
    assert_eq!(
        state.borrow().error.as_deref(),
        Some("'create-webrtc-transport' rejected by the server: router is full")
    );
}

#[tokio::test]
async fn publish_is_idempotent_per_track() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let (audio, _audio_handle) = LocalTrack::new(MediaKind::Audio);
    let (video, _video_handle) = LocalTrack::new(MediaKind::Video);
    let tracks = [audio, video];
    session.publish(&tracks).await.unwrap();
    session.publish(&tracks).await.unwrap();

    assert_eq!(session.stats().await.producers, 2);
    let produces = server
        .received_events()
        .iter()
        .filter(|e| *e == "produce")
        .count();
    assert_eq!(produces, 2);
}

#[tokio::test]
async fn publishing_a_second_video_track_replaces_the_producer() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let (camera, _camera_handle) = LocalTrack::new(MediaKind::Video);
    session.publish(&[camera]).await.unwrap();
    let (screen, _screen_handle) = LocalTrack::new(MediaKind::Video);
    session.publish(&[screen]).await.unwrap();

    // screen-share replaces, not adds: still one producer per kind
    assert_eq!(session.stats().await.producers, 1);
    let produces = server
        .received_events()
        .iter()
        .filter(|e| *e == "produce")
        .count();
    assert_eq!(produces, 2);
}

#[tokio::test]
async fn ended_tracks_close_their_producer_and_allow_republish() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let (audio, audio_handle) = LocalTrack::new(MediaKind::Audio);
    session.publish(&[audio]).await.unwrap();
    assert_eq!(session.stats().await.producers, 1);

    audio_handle.end();
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.stats().await.producers != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for the producer to close");

    // the audio slot is free again, so a fresh capture is not silently skipped
    let (replacement, _replacement_handle) = LocalTrack::new(MediaKind::Audio);
    session.publish(&[replacement]).await.unwrap();
    assert_eq!(session.stats().await.producers, 1);
}

#[tokio::test]
async fn publish_requires_a_connected_session() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    let (audio, _handle) = LocalTrack::new(MediaKind::Audio);
    let err = session.publish(&[audio]).await.unwrap_err();
    assert!(matches!(err, SessionError::NotConnected));
}

#[tokio::test]
async fn resume_failures_do_not_discard_the_consumer() {
    let config = TestSfuConfig {
        peers: vec![peer("p2", "bob", &["prod1"])],
        producers: HashMap::from([("prod1".to_owned(), MediaKind::Audio)]),
        fail_events: HashMap::from([("resume-consumer".to_owned(), "not ready".to_owned())]),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let mut state = session.watch();
    wait_for(&mut state, "bob's track", |s| {
        s.peers.get("p2").map(|p| p.stream.tracks.len()) == Some(1)
    })
    .await;

    // one retry after the first failure, then the consumer is kept
    wait_until("both resume attempts", || {
        server
            .received_events()
            .iter()
            .filter(|e| *e == "resume-consumer")
            .count()
            == 2
    })
    .await;
    assert_eq!(session.stats().await.consumers, 1);
}

#[tokio::test]
async fn teardown_is_idempotent() {
    let config = TestSfuConfig {
        peers: vec![peer("p2", "bob", &["prod1"])],
        producers: HashMap::from([("prod1".to_owned(), MediaKind::Audio)]),
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();

    let (audio, _handle) = LocalTrack::new(MediaKind::Audio);
    session.publish(&[audio]).await.unwrap();

    session.leave().await;
    session.leave().await;

    let state = session.watch();
    assert_eq!(state.borrow().status, SessionStatus::Idle);
    assert!(state.borrow().peers.is_empty());
    let stats = session.stats().await;
    assert_eq!(stats.producers, 0);
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.transports, 0);
}

#[tokio::test]
async fn leave_from_an_error_state_returns_to_idle() {
    let config = TestSfuConfig {
        router_capabilities: None,
        ..TestSfuConfig::default()
    };
    let server = TestSfu::spawn(config).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap_err();
    assert_eq!(session.watch().borrow().status, SessionStatus::Error);

    session.leave().await;
    let state = session.watch();
    assert_eq!(state.borrow().status, SessionStatus::Idle);
    assert!(state.borrow().error.is_none());
}

#[tokio::test]
async fn join_may_only_run_once() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.join().await.unwrap();
    let err = session.join().await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadyJoined));
}

#[tokio::test]
async fn joining_a_left_session_fails() {
    let server = TestSfu::spawn(TestSfuConfig::default()).await.unwrap();
    let session = Session::new(config_for(&server));
    session.leave().await;
    let err = session.join().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Signaling(SignalingError::ChannelClosed)
    ));
}

#[tokio::test]
async fn connecting_to_a_dead_endpoint_reports_a_connect_error() {
    // bind-then-drop to get an address nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = SessionConfig::new(format!("ws://{addr}"), "r1", "alice");
    config.connect_timeout = Duration::from_secs(2);
    let session = Session::new(config);
    let err = session.join().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Signaling(SignalingError::ConnectError(_))
    ));
    assert_eq!(session.watch().borrow().status, SessionStatus::Error);
}
