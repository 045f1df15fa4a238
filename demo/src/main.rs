use std::io::Write;

use anyhow::Result;
use clap::Parser;
use sfu_client::testing::{TestSfu, TestSfuConfig};
use sfu_client::{
    LocalTrack, MediaKind, PeerInfo, ServerEvent, Session, SessionConfig, SessionStatus,
};

// joins an in-process signaling stub, publishes a pair of synthetic tracks,
// and prints directory updates while a scripted remote peer shows up and
// publishes. useful for watching the orchestrator work without a real SFU.

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// room to join
    #[arg(default_value = "demo-room")]
    room: String,
    /// display name to join with
    #[arg(default_value = "alice")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%3f"),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Debug)
        .init();

    let cli = Cli::parse();

    let server = TestSfu::spawn(TestSfuConfig::default()).await?;
    log::info!("test sfu listening on {}", server.url());

    let session = Session::new(SessionConfig::new(server.url(), &cli.room, &cli.name));
    let mut state = session.watch();

    session.join().await?;
    log::info!(
        "joined {} as {}",
        cli.room,
        session.local_peer_id().unwrap_or_default()
    );

    let (microphone, _microphone_handle) = LocalTrack::new(MediaKind::Audio);
    let (camera, _camera_handle) = LocalTrack::new(MediaKind::Video);
    session.publish(&[microphone, camera]).await?;

    // script a remote participant joining and publishing a camera track
    server.add_producer("bob-camera", MediaKind::Video);
    server.push(ServerEvent::NewPeer {
        peer: PeerInfo {
            id: "p2".to_owned(),
            display_name: "bob".to_owned(),
            producer_ids: vec![],
        },
    });
    server.push(ServerEvent::NewProducer {
        producer_id: "bob-camera".to_owned(),
        peer_id: "p2".to_owned(),
    });

    loop {
        state.changed().await?;
        let snapshot = state.borrow().clone();
        log::info!("status {} - {} peer(s)", snapshot.status, snapshot.peers.len());
        for peer in snapshot.peers.values() {
            log::info!(
                "  {} ({}): {} track(s)",
                peer.display_name,
                peer.id,
                peer.stream.tracks.len()
            );
        }
        if snapshot
            .peers
            .values()
            .any(|peer| !peer.stream.tracks.is_empty())
        {
            break;
        }
    }

    session.leave().await;
    assert_eq!(session.watch().borrow().status, SessionStatus::Idle);
    log::info!("left the room");
    Ok(())
}
