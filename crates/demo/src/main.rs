//! Headless session demo: runs the full client stack (transport, session
//! controller, prediction, interpolation) against a scripted in-process
//! server so the whole loop can be watched from a terminal.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use updraft::net::protocol::{
    C2sMessage, NetPlayer, Pong, Role, RoomState, S2cMessage, Snapshot, Welcome,
};
use updraft::net::{decode_c2s, encode_s2c};
use updraft::sim::{GameConfig, GameInput, GameSession};
use updraft_client::controller::{SessionConfig, SessionController};
use updraft_client::credentials::{CredentialStore, MemoryCredentialStore, SharedCredentialStore};
use updraft_client::loopback::LoopbackConnector;
use updraft_client::transport::{OutboundFrame, SocketEvent, Transport, system_clock};

#[derive(Parser, Debug)]
#[command(about = "Run the updraft client session against a scripted server")]
struct Args {
    /// Simulation ticks to run
    #[arg(long, default_value_t = 300)]
    ticks: u32,

    /// Send single input frames instead of batches
    #[arg(long)]
    single: bool,

    /// World seed handed out by the scripted server
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

/// Minimal authoritative peer: welcomes the client, acks its inputs and
/// replays a wandering second player.
async fn scripted_server(connector: LoopbackConnector, seed: u64) {
    let clock = system_clock();
    let mut server_seq = 0u32;
    loop {
        let mut peer = connector.wait_for_peer().await;
        peer.events.send(SocketEvent::Opened).ok();
        let mut remote_x = 0.0f32;
        let mut latest_tick = 0i64;
        while let Some(frame) = peer.outbound.recv().await {
            let OutboundFrame::Text(text) = frame else {
                // Normal closure from the client; wait for the next dial.
                break;
            };
            let envelope = match decode_c2s(&text) {
                Ok(envelope) => envelope,
                Err(error) => {
                    log::warn!("server failed to decode client frame: {error}");
                    continue;
                }
            };
            let reply = match envelope.payload {
                C2sMessage::Join(join) => {
                    log::info!("server: {} joined", join.name);
                    Some(S2cMessage::Welcome(Welcome {
                        player_id: "p1".to_string(),
                        resume_token: "resume-p1".to_string(),
                        room_id: "demo".to_string(),
                        seed: seed.to_string(),
                        role: Role::Master,
                        room_state: RoomState::Running,
                        lobby: None,
                        cfg: None,
                        feature_flags: None,
                    }))
                }
                C2sMessage::Ping(ping) => Some(S2cMessage::Pong(Pong {
                    t0: ping.t0,
                    t1: clock(),
                })),
                C2sMessage::Input(input) => {
                    latest_tick = latest_tick.max(input.tick);
                    remote_x = (remote_x + 0.05).rem_euclid(3.0);
                    Some(ack_snapshot(latest_tick, remote_x))
                }
                C2sMessage::InputBatch(batch) => {
                    let newest = batch.frames.iter().map(|f| batch.start_tick + f.d).max();
                    latest_tick = latest_tick.max(newest.unwrap_or(latest_tick));
                    remote_x = (remote_x + 0.05).rem_euclid(3.0);
                    Some(ack_snapshot(latest_tick, remote_x))
                }
                _ => None,
            };
            if let Some(message) = reply {
                server_seq += 1;
                let ts = clock();
                match encode_s2c(&message, server_seq, ts) {
                    Ok(text) => {
                        peer.events.send(SocketEvent::Message(text)).ok();
                    }
                    Err(error) => log::warn!("server failed to encode reply: {error}"),
                }
            }
        }
    }
}

fn ack_snapshot(tick: i64, remote_x: f32) -> S2cMessage {
    S2cMessage::Snapshot(Snapshot {
        tick,
        ack_tick: Some(tick),
        last_input_seq: None,
        full: false,
        players: vec![NetPlayer {
            id: "p2".to_string(),
            x: Some(remote_x),
            y: Some(1.0),
            vx: Some(3.0),
            vy: None,
            alive: Some(true),
        }],
        events: None,
        stats: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let connector = LoopbackConnector::new();
    tokio::spawn(scripted_server(connector.clone(), args.seed));

    let clock = system_clock();
    let transport = Transport::new(Box::new(connector), clock.clone());
    let credentials = SharedCredentialStore::new(MemoryCredentialStore::new());
    let mut controller = SessionController::new(
        GameSession::new(GameConfig::default(), args.seed),
        transport,
        tokio::runtime::Handle::current(),
        Some(Box::new(credentials) as Box<dyn CredentialStore>),
        clock.clone(),
    );
    controller.start(SessionConfig {
        ws_url: "loopback://demo".to_string(),
        player_name: "demo".to_string(),
        client_version: env!("CARGO_PKG_VERSION").to_string(),
        device: "headless".to_string(),
        use_input_batch: !args.single,
        interpolation_delay_ms: 100,
    });

    let mut remote_players = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    for tick in 0..args.ticks {
        ticker.tick().await;
        let input = GameInput {
            tilt: (tick as f32 * 0.05).sin() * 0.8,
            ..GameInput::default()
        };
        controller.step(&input, 1.0 / 60.0);
        controller.sample_remote_players(clock(), &mut remote_players);

        if tick % 60 == 0 {
            let status = controller.status();
            let world = &controller.session().world;
            log::info!(
                "tick {:>4} phase {:?} ack {} pos ({:.2}, {:.2}) remotes {} rtt {}ms",
                world.tick,
                status.phase,
                status.last_ack_tick,
                world.player.position.x,
                world.player.position.y,
                remote_players.len(),
                status.link.rtt_ms,
            );
        }
    }

    controller.stop();
    let status = controller.status();
    println!(
        "finished: phase {:?}, ack tick {}, sent {} messages, received {}",
        status.phase, status.last_ack_tick, status.link.messages_sent, status.link.messages_received,
    );
    Ok(())
}
