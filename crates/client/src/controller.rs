use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::mpsc;

use updraft::net::protocol::{
    C2sMessage, CharacterSelect, ErrorMsg, Input, InputBatch, InputDelta, Join, LobbyPlayer,
    LobbyState, NetErrorCode, NetPlayer, PlayerPresence, PresenceState, ReadySet, Reconnect, Role,
    RoleChanged, RoomState, S2cMessage, Snapshot, Start, StartCountdown, StartRequest, Welcome,
};
use updraft::net::{
    CHECKSUM_INTERVAL, CapabilityFlags, CompactState, HistoryBuffer, InterpolationBuffer,
    state_checksum_hex,
};
use updraft::sim::{GameInput, GameSession};

use crate::credentials::CredentialStore;
use crate::transport::{Clock, LinkSnapshot, Transport, TransportEvent};

const HISTORY_CAPACITY: usize = 512;
const STEP_SECONDS: f32 = 1.0 / 60.0;
const SEND_INTERVAL_BATCH_MS: i64 = 45;
const SEND_INTERVAL_SINGLE_MS: i64 = 60;
const REMOTE_KEEP_WINDOW_MS: i64 = 1_000;

/// Externally observable connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Running,
    Reconnecting,
    Finished,
}

/// Session parameters fixed at `start`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ws_url: String,
    pub player_name: String,
    pub client_version: String,
    pub device: String,
    pub use_input_batch: bool,
    pub interpolation_delay_ms: i64,
}

/// Point-in-time view of the session for UI and telemetry.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: Phase,
    pub player_id: Option<String>,
    pub room_id: Option<String>,
    pub role: Role,
    pub room_state: RoomState,
    pub lobby: Vec<LobbyPlayer>,
    pub countdown: Option<StartCountdown>,
    pub last_ack_tick: i64,
    pub last_input_seq: Option<u32>,
    pub last_error: Option<String>,
    pub last_error_code: Option<NetErrorCode>,
    pub link: LinkSnapshot,
}

/// A remote player resolved for rendering.
#[derive(Debug, Clone)]
pub struct RemotePlayerView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

struct QueuedSnapshot {
    ts: i64,
    snapshot: Snapshot,
}

/// Client session state machine: owns the local simulation, the history and
/// interpolation buffers, and decides what goes over the transport.
///
/// Single-threaded by contract: every mutation happens inside `step`,
/// `start` or `stop`, called from the game loop. Network messages are
/// queued by the transport and drained once per `step`, which keeps
/// snapshot application causally ordered against local ticking.
pub struct SessionController {
    session: GameSession,
    transport: Transport,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    runtime: tokio::runtime::Handle,
    credentials: Option<Box<dyn CredentialStore>>,
    clock: Clock,

    history: HistoryBuffer,
    interpolation: InterpolationBuffer,
    remote_states: HashMap<String, CompactState>,
    snapshot_queue: VecDeque<QueuedSnapshot>,

    config: Option<SessionConfig>,
    phase: Phase,
    player_id: Option<String>,
    resume_token: Option<String>,
    room_id: Option<String>,
    role: Role,
    room_state: RoomState,
    lobby: Vec<LobbyPlayer>,
    countdown: Option<StartCountdown>,
    last_error: Option<String>,
    last_error_code: Option<NetErrorCode>,

    last_ack_tick: i64,
    last_input_seq: Option<u32>,
    last_sent_tick: i64,
    latest_tick: i64,
    latest_input_tick: i64,
    last_send_at_ms: i64,
    last_checksum_tick: i64,
    awaiting_start: bool,
    use_input_batch: bool,
    interpolation_delay_ms: i64,
}

impl SessionController {
    pub fn new(
        session: GameSession,
        transport: Transport,
        runtime: tokio::runtime::Handle,
        credentials: Option<Box<dyn CredentialStore>>,
        clock: Clock,
    ) -> Self {
        Self {
            session,
            transport,
            events: None,
            runtime,
            credentials,
            clock,
            history: HistoryBuffer::new(HISTORY_CAPACITY),
            interpolation: InterpolationBuffer::with_defaults(),
            remote_states: HashMap::new(),
            snapshot_queue: VecDeque::new(),
            config: None,
            phase: Phase::Idle,
            player_id: None,
            resume_token: None,
            room_id: None,
            role: Role::Member,
            room_state: RoomState::Lobby,
            lobby: Vec::new(),
            countdown: None,
            last_error: None,
            last_error_code: None,
            last_ack_tick: -1,
            last_input_seq: None,
            last_sent_tick: -1,
            latest_tick: -1,
            latest_input_tick: -1,
            last_send_at_ms: 0,
            last_checksum_tick: -1,
            awaiting_start: false,
            use_input_batch: true,
            interpolation_delay_ms: 100,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            player_id: self.player_id.clone(),
            room_id: self.room_id.clone(),
            role: self.role,
            room_state: self.room_state,
            lobby: self.lobby.clone(),
            countdown: self.countdown,
            last_ack_tick: self.last_ack_tick,
            last_input_seq: self.last_input_seq,
            last_error: self.last_error.clone(),
            last_error_code: self.last_error_code.clone(),
            link: self.transport.stats(),
        }
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Open the transport and begin the join/reconnect handshake. No-op
    /// while already connecting or running.
    pub fn start(&mut self, config: SessionConfig) {
        if self.phase == Phase::Running || self.phase == Phase::Connecting {
            return;
        }
        self.use_input_batch = config.use_input_batch;
        self.interpolation_delay_ms = config.interpolation_delay_ms;
        if let Some(store) = self.credentials.as_deref() {
            let stored = store.load();
            if self.player_id.is_none() {
                self.player_id = stored.player_id;
                self.resume_token = stored.resume_token;
                self.last_ack_tick = stored.last_ack_tick.unwrap_or(-1);
            }
        }
        self.phase = Phase::Connecting;
        self.last_error = None;
        self.last_error_code = None;
        // The game loop may live outside the runtime; enter it for the spawn.
        let guard = self.runtime.enter();
        self.events = Some(self.transport.start(&config.ws_url));
        drop(guard);
        self.config = Some(config);
    }

    /// Tear the session down: cancel transport work, close the socket with
    /// a normal closure and settle in `Finished`. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.events = None;
        self.snapshot_queue.clear();
        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            transport.stop().await;
        });
        self.phase = Phase::Finished;
        self.room_state = RoomState::Finished;
        self.countdown = None;
    }

    /// Advance the local simulation by one tick and run the per-frame
    /// network duties: drain transport events, apply queued snapshots,
    /// record input/state history, and flush inputs per the send policy.
    pub fn step(&mut self, input: &GameInput, dt: f32) {
        self.drain_events();
        self.drain_snapshots();

        let tick = self.session.world.tick;
        let axis_x = input.tilt.clamp(-1.0, 1.0);
        self.history.put_input(tick, axis_x, input.touch, false, None);
        self.latest_input_tick = tick;

        self.session.step(input, dt);

        let sim_tick = self.session.world.tick;
        self.latest_tick = sim_tick;
        let state = CompactState::capture(&self.session.world);
        self.history.put_state(sim_tick, state);

        if self.phase == Phase::Running {
            self.maybe_attach_checksum(tick);
            self.maybe_send_inputs(self.latest_input_tick);
        }
    }

    /// Flag readiness to the room over the realtime channel.
    pub fn set_ready(&self, ready: bool) {
        self.send(C2sMessage::ReadySet(ReadySet { ready }));
    }

    /// Ask the server to start the room, optionally with a countdown.
    /// Servers reject this from non-master players.
    pub fn request_start(&self, countdown_sec: Option<u32>) {
        self.send(C2sMessage::StartRequest(StartRequest { countdown_sec }));
    }

    pub fn select_character(&self, character_id: &str) {
        self.send(C2sMessage::CharacterSelect(CharacterSelect {
            character_id: character_id.to_string(),
        }));
    }

    /// Resolve every remote player at `now_ms - interpolation delay` for
    /// rendering, pruning stale samples on the way.
    pub fn sample_remote_players(&mut self, now_ms: i64, out: &mut Vec<RemotePlayerView>) {
        self.interpolation.prune(now_ms, REMOTE_KEEP_WINDOW_MS);
        out.clear();
        let render_time = now_ms - self.interpolation_delay_ms;
        let size = self.session.world.player.half_size * 2.0;
        let mut scratch = CompactState::default();
        for id in self.remote_states.keys() {
            if Some(id) == self.player_id.as_ref() {
                continue;
            }
            if self.interpolation.sample(id, render_time, &mut scratch) {
                out.push(RemotePlayerView {
                    id: id.clone(),
                    x: scratch.x,
                    y: scratch.y,
                    size,
                });
            }
        }
    }

    fn drain_events(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
        if self.events.is_none() && self.phase != Phase::Finished {
            self.events = Some(events);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(envelope) => {
                let ts = envelope.ts;
                match envelope.payload {
                    S2cMessage::Welcome(welcome) => self.on_welcome(welcome),
                    S2cMessage::LobbyState(state) => self.on_lobby_state(state),
                    S2cMessage::StartCountdown(countdown) => self.on_start_countdown(countdown),
                    S2cMessage::Start(start) => self.on_start(start),
                    S2cMessage::Snapshot(snapshot) => self.on_snapshot(ts, snapshot),
                    S2cMessage::Error(error) => self.on_error(error),
                    // RTT/skew are folded into link stats by the transport.
                    S2cMessage::Pong(_) => {}
                    S2cMessage::PlayerPresence(presence) => self.on_presence(presence),
                    S2cMessage::Finish(_) => self.on_finish(),
                    S2cMessage::RoleChanged(change) => self.on_role_changed(change),
                }
            }
            TransportEvent::Closed { .. } => {
                if self.phase == Phase::Finished {
                    return;
                }
                if self.phase != Phase::Connecting {
                    self.phase = Phase::Reconnecting;
                }
            }
            TransportEvent::Failure(error) => {
                log::warn!("transport failure: {error}");
                self.last_error = Some(error);
                if self.phase != Phase::Finished {
                    self.phase = Phase::Reconnecting;
                }
            }
        }
    }

    fn on_opened(&mut self) {
        // The acknowledged tick survives the buffer reset so the server can
        // resume us from where we left off.
        let resume_ack = self.last_ack_tick;
        self.history.reset();
        self.last_ack_tick = resume_ack;
        self.last_sent_tick = -1;
        self.latest_input_tick = -1;
        self.latest_tick = self.session.world.tick;
        self.snapshot_queue.clear();
        self.awaiting_start = true;

        let resuming =
            self.resume_token.is_some() && self.player_id.is_some() && resume_ack >= 0;
        self.phase = if resuming { Phase::Reconnecting } else { Phase::Connecting };

        let message = if resuming {
            let (Some(player_id), Some(resume_token)) =
                (self.player_id.clone(), self.resume_token.clone())
            else {
                return;
            };
            C2sMessage::Reconnect(Reconnect {
                player_id,
                resume_token,
                last_ack_tick: resume_ack,
            })
        } else {
            let Some(config) = self.config.as_ref() else {
                return;
            };
            C2sMessage::Join(Join {
                name: config.player_name.clone(),
                client_version: config.client_version.clone(),
                device: config.device.clone(),
                capabilities: CapabilityFlags::TILT
                    | CapabilityFlags::VIBRATE
                    | CapabilityFlags::TOUCH,
            })
        };
        self.send(message);
    }

    fn on_welcome(&mut self, welcome: Welcome) {
        if let Some(store) = self.credentials.as_deref_mut() {
            store.store_identity(&welcome.player_id, &welcome.resume_token);
        }
        self.player_id = Some(welcome.player_id);
        self.resume_token = Some(welcome.resume_token);
        self.room_id = Some(welcome.room_id);
        self.role = welcome.role;
        self.room_state = welcome.room_state;
        self.countdown = None;

        let seed = welcome
            .seed
            .parse::<u64>()
            .unwrap_or(self.session.world.seed);
        self.session.restart(seed);
        self.history.reset();
        self.last_ack_tick = -1;
        self.latest_input_tick = -1;
        self.latest_tick = 0;
        self.interpolation.clear();
        self.remote_states.clear();

        self.awaiting_start = welcome.room_state != RoomState::Running;
        self.lobby = welcome
            .lobby
            .map(|snapshot| snapshot.players)
            .unwrap_or_default();
        match self.room_state {
            RoomState::Running => self.phase = Phase::Running,
            RoomState::Finished => self.phase = Phase::Finished,
            _ => {}
        }
    }

    fn on_start(&mut self, start: Start) {
        self.awaiting_start = false;
        self.session.world.tick = start.start_tick;
        self.latest_tick = start.start_tick;
        self.history.reset();
        self.phase = Phase::Running;
        self.room_state = RoomState::Running;
        self.countdown = None;
    }

    fn on_start_countdown(&mut self, countdown: StartCountdown) {
        self.awaiting_start = true;
        self.room_state = RoomState::Starting;
        self.countdown = Some(countdown);
    }

    fn on_lobby_state(&mut self, state: LobbyState) {
        self.room_state = state.room_state;
        if self.room_state != RoomState::Starting {
            self.countdown = None;
        }
        self.lobby = state.players;
    }

    /// Snapshots are queued in arrival order and applied once per step,
    /// never mid-frame.
    fn on_snapshot(&mut self, ts: i64, snapshot: Snapshot) {
        if self.awaiting_start {
            return;
        }
        self.snapshot_queue.push_back(QueuedSnapshot { ts, snapshot });
    }

    fn on_error(&mut self, error: ErrorMsg) {
        self.last_error_code = Some(error.net_code());
        self.last_error = error.message.or_else(|| Some(error.code.clone()));
        self.phase = Phase::Reconnecting;
    }

    fn on_finish(&mut self) {
        self.stop();
    }

    fn on_presence(&mut self, presence: PlayerPresence) {
        if presence.state == PresenceState::Left {
            self.remote_states.remove(&presence.id);
            self.interpolation.remove(&presence.id);
        }
    }

    fn on_role_changed(&mut self, change: RoleChanged) {
        if Some(&change.new_master_id) == self.player_id.as_ref() {
            self.role = Role::Master;
        } else if self.role == Role::Master {
            self.role = Role::Member;
        }
    }

    fn drain_snapshots(&mut self) {
        while let Some(queued) = self.snapshot_queue.pop_front() {
            self.apply_snapshot(queued.ts, queued.snapshot);
        }
    }

    fn apply_snapshot(&mut self, ts: i64, snapshot: Snapshot) {
        if let Some(ack) = snapshot.ack_tick {
            if ack > self.last_ack_tick {
                self.last_ack_tick = ack;
                if let Some(store) = self.credentials.as_deref_mut() {
                    store.store_ack_tick(ack);
                }
            }
            self.history.trim_before(ack);
        }
        if let Some(seq) = snapshot.last_input_seq {
            self.last_input_seq = Some(seq);
        }
        if snapshot.full {
            // A full snapshot is the complete roster: anyone missing is gone.
            let present: HashSet<&str> =
                snapshot.players.iter().map(|p| p.id.as_str()).collect();
            let stale: Vec<String> = self
                .remote_states
                .keys()
                .filter(|id| !present.contains(id.as_str()))
                .cloned()
                .collect();
            for id in stale {
                self.remote_states.remove(&id);
                self.interpolation.remove(&id);
            }
        }
        for player in &snapshot.players {
            if Some(&player.id) == self.player_id.as_ref() {
                self.apply_local_player(snapshot.tick, player);
            } else {
                self.apply_remote_player(ts, player);
            }
        }
    }

    /// Reconciliation: adopt the authoritative kinematics at `tick`, then
    /// replay locally buffered inputs forward through the deterministic
    /// stepper to re-predict the ticks the server has not confirmed yet.
    /// A gap in the history ends the replay early rather than failing.
    fn apply_local_player(&mut self, tick: i64, player: &NetPlayer) {
        {
            let world = &mut self.session.world;
            if let Some(x) = player.x {
                world.player.position.x = x;
            }
            if let Some(y) = player.y {
                world.player.position.y = y;
            }
            if let Some(vx) = player.vx {
                world.player.velocity.x = vx;
            }
            if let Some(vy) = player.vy {
                world.player.velocity.y = vy;
            }
            world.tick = tick;
        }
        self.latest_tick = self.latest_tick.max(tick);
        if self.last_sent_tick < tick {
            self.last_sent_tick = tick;
        }
        if self.latest_tick > tick {
            let mut next_tick = tick + 1;
            while next_tick <= self.latest_tick {
                let Some(frame) = self.history.input(next_tick) else {
                    break;
                };
                let replay = GameInput {
                    tilt: frame.axis_x,
                    touch: frame.jump,
                    pause: false,
                };
                self.session.step(&replay, STEP_SECONDS);
                next_tick += 1;
            }
            self.latest_tick = self.session.world.tick;
        }
    }

    /// Sparse merge: absent fields keep their last known value, then the
    /// merged state is queued for interpolated rendering.
    fn apply_remote_player(&mut self, ts: i64, player: &NetPlayer) {
        let state = self.remote_states.entry(player.id.clone()).or_default();
        if let Some(x) = player.x {
            state.x = x;
        }
        if let Some(y) = player.y {
            state.y = y;
        }
        if let Some(vx) = player.vx {
            state.vx = vx;
        }
        if let Some(vy) = player.vy {
            state.vy = vy;
        }
        let merged = *state;
        self.interpolation
            .push(&player.id, ts + self.interpolation_delay_ms, merged);
    }

    fn maybe_attach_checksum(&mut self, tick: i64) {
        if tick - self.last_checksum_tick < CHECKSUM_INTERVAL {
            return;
        }
        let state = CompactState::capture(&self.session.world);
        let checksum = state_checksum_hex(&state, tick, &self.session.world);
        self.history.set_checksum(tick, checksum);
        self.last_checksum_tick = tick;
    }

    fn maybe_send_inputs(&mut self, target_tick: i64) {
        if target_tick <= self.last_sent_tick {
            return;
        }
        let now = (self.clock)();
        let min_interval = if self.use_input_batch {
            SEND_INTERVAL_BATCH_MS
        } else {
            SEND_INTERVAL_SINGLE_MS
        };
        if now - self.last_send_at_ms < min_interval {
            return;
        }
        if self.use_input_batch {
            self.send_input_batch(self.last_sent_tick + 1, target_tick);
        } else {
            self.send_single(target_tick);
        }
        self.last_sent_tick = target_tick;
        self.last_send_at_ms = now;
    }

    fn send_single(&mut self, tick: i64) {
        let Some(frame) = self.history.input(tick) else {
            return;
        };
        let message = C2sMessage::Input(Input {
            tick,
            axis_x: frame.axis_x,
            jump: frame.jump.then_some(true),
            shoot: frame.shoot.then_some(true),
            checksum: frame.checksum.clone(),
        });
        self.send(message);
    }

    fn send_input_batch(&mut self, from_tick: i64, to_tick: i64) {
        if to_tick < from_tick {
            return;
        }
        let mut start_tick = from_tick;
        let mut frames: Vec<InputDelta> = Vec::new();
        self.history.replay(from_tick, to_tick, |frame| {
            if frames.is_empty() {
                start_tick = frame.tick;
            }
            frames.push(InputDelta {
                d: frame.tick - start_tick,
                axis_x: frame.axis_x,
                jump: frame.jump.then_some(true),
                shoot: frame.shoot.then_some(true),
                checksum: frame.checksum.clone(),
            });
        });
        if frames.is_empty() {
            return;
        }
        self.send(C2sMessage::InputBatch(InputBatch { start_tick, frames }));
    }

    /// Fire-and-forget send on the runtime; `step` never blocks on the
    /// socket or the rate limiter.
    fn send(&self, message: C2sMessage) {
        if self.phase == Phase::Finished {
            return;
        }
        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            if let Err(error) = transport.send(&message).await {
                log::warn!("send failed: {error}");
            }
        });
    }
}
