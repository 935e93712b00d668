//! End-to-end session scenarios against a scripted loopback socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use updraft::net::protocol::{
    C2sMessage, Envelope, LobbyPlayer, NetPlayer, Role, RoomState, S2cMessage, Snapshot, Start,
    StartCountdown, Welcome,
};
use updraft::net::{decode_c2s, encode_s2c};
use updraft::sim::{GameConfig, GameInput, GameSession};
use updraft_client::controller::{Phase, SessionConfig, SessionController};
use updraft_client::credentials::{MemoryCredentialStore, SharedCredentialStore};
use updraft_client::loopback::{LoopbackConnector, LoopbackPeer};
use updraft_client::transport::{Clock, SocketEvent, Transport};

const DT: f32 = 1.0 / 60.0;
const SEED: u64 = 1;

struct Harness {
    controller: SessionController,
    connector: LoopbackConnector,
    peer: LoopbackPeer,
    clock: Arc<AtomicI64>,
    server_seq: u32,
}

impl Harness {
    async fn connect(credentials: Option<SharedCredentialStore>, use_input_batch: bool) -> Self {
        let clock = Arc::new(AtomicI64::new(0));
        let clock_handle = Arc::clone(&clock);
        let clock_fn: Clock = Arc::new(move || clock_handle.load(Ordering::SeqCst));

        let connector = LoopbackConnector::new();
        let transport = Transport::new(Box::new(connector.clone()), Arc::clone(&clock_fn));
        let mut controller = SessionController::new(
            GameSession::new(GameConfig::default(), SEED),
            transport,
            tokio::runtime::Handle::current(),
            credentials.map(|store| Box::new(store) as _),
            clock_fn,
        );
        controller.start(SessionConfig {
            ws_url: "ws://room".to_string(),
            player_name: "bene".to_string(),
            client_version: "test".to_string(),
            device: "headless".to_string(),
            use_input_batch,
            interpolation_delay_ms: 0,
        });
        let peer = connector.wait_for_peer().await;
        Self { controller, connector, peer, clock, server_seq: 0 }
    }

    fn advance_clock(&self, ms: i64) {
        self.clock.fetch_add(ms, Ordering::SeqCst);
    }

    async fn open(&mut self) {
        self.peer.events.send(SocketEvent::Opened).unwrap();
        self.settle().await;
        self.controller.step(&GameInput::default(), DT);
        self.settle().await;
    }

    async fn server_send(&mut self, msg: S2cMessage) {
        self.server_seq += 1;
        let ts = self.clock.load(Ordering::SeqCst);
        let text = encode_s2c(&msg, self.server_seq, ts).unwrap();
        self.peer.events.send(SocketEvent::Message(text)).unwrap();
        self.settle().await;
    }

    /// Let the transport task and any spawned sends run.
    async fn settle(&self) {
        sleep(Duration::from_millis(1)).await;
    }

    fn step(&mut self, input: &GameInput) {
        self.controller.step(input, DT);
    }

    /// Next decoded outbound message, skipping heartbeat pings.
    fn try_next_outbound(&mut self) -> Option<Envelope<C2sMessage>> {
        while let Ok(frame) = self.peer.outbound.try_recv() {
            if let updraft_client::transport::OutboundFrame::Text(text) = frame {
                let envelope = decode_c2s(&text).unwrap();
                if envelope.kind != "ping" {
                    return Some(envelope);
                }
            }
        }
        None
    }

    fn drain_outbound(&mut self) {
        while self.try_next_outbound().is_some() {}
    }

    fn roster() -> Vec<LobbyPlayer> {
        vec![
            LobbyPlayer {
                id: "p1".to_string(),
                name: "bene".to_string(),
                ready: true,
                role: Role::Master,
                character_id: Some("aurora".to_string()),
            },
            LobbyPlayer {
                id: "p2".to_string(),
                name: "ally".to_string(),
                ready: true,
                role: Role::Member,
                character_id: Some("cobalt".to_string()),
            },
        ]
    }

    fn welcome(room_state: RoomState) -> S2cMessage {
        S2cMessage::Welcome(Welcome {
            player_id: "p1".to_string(),
            resume_token: "resume".to_string(),
            room_id: "room1".to_string(),
            seed: SEED.to_string(),
            role: Role::Master,
            room_state,
            lobby: Some(updraft::net::protocol::LobbySnapshot {
                players: Self::roster(),
                max_players: 4,
            }),
            cfg: None,
            feature_flags: None,
        })
    }

    fn net_player(id: &str, x: f32, y: f32) -> NetPlayer {
        NetPlayer {
            id: id.to_string(),
            x: Some(x),
            y: Some(y),
            vx: Some(0.0),
            vy: Some(0.0),
            alive: Some(true),
        }
    }

    fn snapshot(tick: i64, full: bool, players: Vec<NetPlayer>) -> S2cMessage {
        S2cMessage::Snapshot(Snapshot {
            tick,
            ack_tick: Some(tick),
            last_input_seq: Some(1),
            full,
            players,
            events: None,
            stats: None,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn join_handshake_goes_out_on_open() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;

    let envelope = harness.try_next_outbound().expect("expected a join");
    assert_eq!(envelope.kind, "join");
    let C2sMessage::Join(join) = envelope.payload else {
        panic!("expected join payload");
    };
    assert_eq!(join.name, "bene");
}

#[tokio::test(start_paused = true)]
async fn welcome_countdown_start_finish_lifecycle() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    assert_eq!(harness.controller.phase(), Phase::Connecting);

    harness.server_send(Harness::welcome(RoomState::Lobby)).await;
    harness.step(&GameInput::default());
    let status = harness.controller.status();
    assert_eq!(status.phase, Phase::Connecting);
    assert_eq!(status.room_state, RoomState::Lobby);
    assert_eq!(status.lobby, Harness::roster());
    assert_eq!(status.role, Role::Master);

    harness
        .server_send(S2cMessage::StartCountdown(StartCountdown {
            start_at_ms: 3_000,
            server_tick: 0,
            countdown_sec: 3,
        }))
        .await;
    harness.step(&GameInput::default());
    let status = harness.controller.status();
    assert_eq!(status.room_state, RoomState::Starting);
    assert!(status.countdown.is_some());

    harness
        .server_send(S2cMessage::Start(Start {
            start_tick: 10,
            server_tick: 10,
            server_time_ms: 500,
            tps: 60,
        }))
        .await;
    harness.step(&GameInput::default());
    assert_eq!(harness.controller.phase(), Phase::Running);
    // Start pinned the simulation to the server's start tick before the
    // step advanced it by one.
    assert_eq!(harness.controller.session().world.tick, 11);

    harness.server_send(S2cMessage::Finish(updraft::net::protocol::Finish { reason: None })).await;
    harness.step(&GameInput::default());
    assert_eq!(harness.controller.phase(), Phase::Finished);

    // Nothing more goes out after Finished.
    harness.settle().await;
    harness.drain_outbound();
    harness.advance_clock(500);
    for _ in 0..10 {
        harness.step(&GameInput::default());
    }
    harness.settle().await;
    assert!(harness.try_next_outbound().is_none());
}

#[tokio::test(start_paused = true)]
async fn reconciliation_replays_inputs_on_corrected_baseline() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());
    assert_eq!(harness.controller.phase(), Phase::Running);

    // Mirror every input into a reference simulation.
    let mut reference = GameSession::new(GameConfig::default(), SEED);
    reference.restart(SEED);
    reference.step(&GameInput::default(), DT);

    let input = GameInput { tilt: 0.5, ..GameInput::default() };
    for _ in 0..5 {
        harness.step(&input);
        reference.step(&input, DT);
    }
    assert_eq!(harness.controller.session().world.tick, 6);

    // Authoritative correction for tick 3: shift x by half a unit.
    let predicted = reference.world.player.position;
    let corrected_x = predicted.x + 0.5;
    let corrected = NetPlayer {
        id: "p1".to_string(),
        x: Some(corrected_x),
        y: Some(reference.world.player.position.y),
        vx: Some(reference.world.player.velocity.x),
        vy: Some(reference.world.player.velocity.y),
        alive: Some(true),
    };
    harness.server_send(Harness::snapshot(3, false, vec![corrected.clone()])).await;
    harness.step(&input);

    // Rebuild the same correction + replay on the reference: overwrite at
    // tick 3, replay buffered inputs for ticks 4 and 5, then the step that
    // accompanied the snapshot drain.
    reference.world.player.position.x = corrected_x;
    reference.world.player.position.y = corrected.y.unwrap();
    reference.world.player.velocity.x = corrected.vx.unwrap();
    reference.world.player.velocity.y = corrected.vy.unwrap();
    reference.world.tick = 3;
    for _ in 0..2 {
        reference.step(&input, DT);
    }
    reference.step(&input, DT);

    let world = &harness.controller.session().world;
    assert_eq!(world.tick, reference.world.tick);
    assert_eq!(world.player.position, reference.world.player.position);
    assert_eq!(world.player.velocity, reference.world.player.velocity);
    // The end state is a re-prediction, not a snap to the server state.
    assert_ne!(world.player.position.x, corrected_x);
}

#[tokio::test(start_paused = true)]
async fn closed_while_running_reconnects_with_resume_token() {
    let store = SharedCredentialStore::new(MemoryCredentialStore::new());
    let mut harness = Harness::connect(Some(store.clone()), false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());

    // An acknowledged tick arrives, so resume state is complete.
    harness
        .server_send(Harness::snapshot(1, false, vec![Harness::net_player("p1", 0.0, 1.0)]))
        .await;
    harness.step(&GameInput::default());
    assert!(harness.controller.status().last_ack_tick >= 0);

    harness
        .peer
        .events
        .send(SocketEvent::Closed { code: Some(1006), reason: None })
        .unwrap();
    harness.settle().await;
    harness.step(&GameInput::default());
    assert_eq!(harness.controller.phase(), Phase::Reconnecting);

    // The transport waits out the backoff and dials again.
    let mut second = harness.connector.wait_for_peer().await;
    assert_eq!(harness.connector.connect_count(), 2);
    second.events.send(SocketEvent::Opened).unwrap();
    harness.settle().await;
    harness.step(&GameInput::default());
    harness.settle().await;

    let frame = second.outbound.recv().await.unwrap();
    let updraft_client::transport::OutboundFrame::Text(text) = frame else {
        panic!("expected text frame");
    };
    let envelope = decode_c2s(&text).unwrap();
    assert_eq!(envelope.kind, "reconnect");
    let C2sMessage::Reconnect(reconnect) = envelope.payload else {
        panic!("expected reconnect payload");
    };
    assert_eq!(reconnect.player_id, "p1");
    assert_eq!(reconnect.resume_token, "resume");
    assert!(reconnect.last_ack_tick >= 0);
}

#[tokio::test(start_paused = true)]
async fn welcome_and_acks_persist_credentials() {
    let store = SharedCredentialStore::new(MemoryCredentialStore::new());
    let mut harness = Harness::connect(Some(store.clone()), false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());

    use updraft_client::credentials::CredentialStore;
    let stored = store.load();
    assert_eq!(stored.player_id.as_deref(), Some("p1"));
    assert_eq!(stored.resume_token.as_deref(), Some("resume"));

    harness
        .server_send(Harness::snapshot(7, false, vec![Harness::net_player("p1", 0.0, 1.0)]))
        .await;
    harness.step(&GameInput::default());
    assert_eq!(store.load().last_ack_tick, Some(7));
}

#[tokio::test(start_paused = true)]
async fn full_snapshot_removes_missing_remote_players() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());

    harness.advance_clock(50);
    harness
        .server_send(Harness::snapshot(
            10,
            true,
            vec![Harness::net_player("p1", 1.0, 2.0), Harness::net_player("p2", 3.0, 4.0)],
        ))
        .await;
    harness.step(&GameInput::default());

    let mut remote = Vec::new();
    harness.controller.sample_remote_players(50, &mut remote);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, "p2");

    harness.advance_clock(50);
    harness
        .server_send(Harness::snapshot(20, true, vec![Harness::net_player("p1", 2.0, 3.0)]))
        .await;
    harness.step(&GameInput::default());

    remote.clear();
    harness.controller.sample_remote_players(100, &mut remote);
    assert!(remote.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sparse_delta_leaves_absent_fields_untouched() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());

    harness.advance_clock(100);
    harness
        .server_send(Harness::snapshot(5, false, vec![Harness::net_player("p2", 1.0, 2.0)]))
        .await;
    harness.step(&GameInput::default());

    // Delta with only x set: y must keep its previous value.
    harness.advance_clock(100);
    harness
        .server_send(Harness::snapshot(
            6,
            false,
            vec![NetPlayer {
                id: "p2".to_string(),
                x: Some(5.0),
                y: None,
                vx: None,
                vy: None,
                alive: None,
            }],
        ))
        .await;
    harness.step(&GameInput::default());

    let mut remote = Vec::new();
    harness.controller.sample_remote_players(200, &mut remote);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].x, 5.0);
    assert_eq!(remote[0].y, 2.0);
}

#[tokio::test(start_paused = true)]
async fn server_error_degrades_to_reconnecting() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());
    assert_eq!(harness.controller.phase(), Phase::Running);

    harness
        .server_send(S2cMessage::Error(updraft::net::protocol::ErrorMsg {
            code: "RATE_LIMITED".to_string(),
            message: Some("slow down".to_string()),
        }))
        .await;
    harness.step(&GameInput::default());

    let status = harness.controller.status();
    assert_eq!(status.phase, Phase::Reconnecting);
    assert_eq!(
        status.last_error_code,
        Some(updraft::net::protocol::NetErrorCode::RateLimited)
    );
    assert_eq!(status.last_error.as_deref(), Some("slow down"));
}

#[tokio::test(start_paused = true)]
async fn batch_mode_flushes_all_ticks_since_last_send() {
    let mut harness = Harness::connect(None, true).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());
    harness.settle().await;
    harness.drain_outbound();

    // Welcome restarted the sim at tick 0; the step above consumed tick 0
    // and flushed nothing yet (clock at 0, last send time 0).
    let input = GameInput { tilt: 0.25, ..GameInput::default() };
    for _ in 0..4 {
        harness.advance_clock(16);
        harness.step(&input);
    }
    harness.settle().await;

    let envelope = harness.try_next_outbound().expect("expected an input batch");
    assert_eq!(envelope.kind, "input_batch");
    let C2sMessage::InputBatch(batch) = envelope.payload else {
        panic!("expected batch payload");
    };
    // Every buffered tick since the last flush is covered, as offsets from
    // the batch base tick.
    let covered: Vec<i64> = batch.frames.iter().map(|f| batch.start_tick + f.d).collect();
    let last = *covered.last().unwrap();
    assert!(covered.len() >= 3);
    assert_eq!(covered, (covered[0]..=last).collect::<Vec<i64>>());
    let newest = batch.frames.last().unwrap();
    assert!((newest.axis_x - 0.25).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn single_mode_sends_most_recent_tick_only() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());
    harness.settle().await;
    harness.drain_outbound();

    let input = GameInput { tilt: -0.75, ..GameInput::default() };
    for _ in 0..5 {
        harness.advance_clock(16);
        harness.step(&input);
    }
    harness.settle().await;

    let envelope = harness.try_next_outbound().expect("expected an input");
    assert_eq!(envelope.kind, "input");
    let C2sMessage::Input(single) = envelope.payload else {
        panic!("expected input payload");
    };
    assert!((single.axis_x + 0.75).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn checksum_rides_along_every_interval() {
    let mut harness = Harness::connect(None, true).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Running)).await;
    harness.step(&GameInput::default());
    harness.settle().await;
    harness.drain_outbound();

    let input = GameInput { tilt: 0.1, ..GameInput::default() };
    let mut checksummed = 0;
    for _ in 0..50 {
        harness.advance_clock(16);
        harness.step(&input);
    }
    harness.settle().await;
    while let Some(envelope) = harness.try_next_outbound() {
        if let C2sMessage::InputBatch(batch) = envelope.payload {
            checksummed += batch.frames.iter().filter(|f| f.checksum.is_some()).count();
        }
    }
    assert!(checksummed >= 2, "expected periodic checksums, got {checksummed}");
}

#[tokio::test(start_paused = true)]
async fn lobby_actions_go_over_the_wire() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.server_send(Harness::welcome(RoomState::Lobby)).await;
    harness.step(&GameInput::default());
    harness.settle().await;
    harness.drain_outbound();

    harness.controller.set_ready(true);
    harness.controller.select_character("aurora");
    harness.controller.request_start(Some(3));
    harness.settle().await;

    let kinds: Vec<String> = std::iter::from_fn(|| harness.try_next_outbound())
        .map(|envelope| envelope.kind)
        .collect();
    assert_eq!(kinds, vec!["ready_set", "character_select", "start_request"]);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let mut harness = Harness::connect(None, false).await;
    harness.open().await;
    harness.controller.stop();
    harness.settle().await;
    assert_eq!(harness.controller.phase(), Phase::Finished);
    harness.controller.stop();
    harness.settle().await;
    assert_eq!(harness.controller.phase(), Phase::Finished);
}
