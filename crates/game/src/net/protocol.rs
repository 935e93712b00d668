use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const PROTOCOL_VERSION: u32 = 1;

/// Outbound sequence numbers wrap back to 0 past this value so they never
/// leave the non-negative 32-bit range.
pub const SEQ_WRAP: u32 = i32::MAX as u32;

pub fn next_seq(current: u32) -> u32 {
    if current >= SEQ_WRAP { 0 } else { current + 1 }
}

bitflags! {
    /// Client capabilities advertised at join time. Carried on the wire as
    /// the raw bits; unknown bits from newer clients are dropped on decode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const TILT = 1;
        const VIBRATE = 1 << 1;
        const TOUCH = 1 << 2;
    }
}

impl Serialize for CapabilityFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for CapabilityFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_bits_truncate(u32::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Master,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    Lobby,
    Starting,
    Running,
    Finished,
}

/// Protocol error codes the server is documented to send. Unknown raw
/// strings are preserved rather than rejected so newer servers keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetErrorCode {
    BadVersion,
    RoomNotFound,
    RoomFull,
    NameTaken,
    InvalidState,
    InvalidTick,
    RateLimited,
    Unauthorized,
    SlowConsumer,
    RoomClosed,
    Internal,
    NotMaster,
    RoomStateInvalid,
    RoomNotReady,
    StartAlready,
    CountdownActive,
    Unknown(String),
}

impl NetErrorCode {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "BAD_VERSION" => Self::BadVersion,
            "ROOM_NOT_FOUND" => Self::RoomNotFound,
            "ROOM_FULL" => Self::RoomFull,
            "NAME_TAKEN" => Self::NameTaken,
            "INVALID_STATE" => Self::InvalidState,
            "INVALID_TICK" => Self::InvalidTick,
            "RATE_LIMITED" => Self::RateLimited,
            "UNAUTHORIZED" => Self::Unauthorized,
            "SLOW_CONSUMER" => Self::SlowConsumer,
            "ROOM_CLOSED" => Self::RoomClosed,
            "INTERNAL" => Self::Internal,
            "NOT_MASTER" => Self::NotMaster,
            "ROOM_STATE_INVALID" => Self::RoomStateInvalid,
            "ROOM_NOT_READY" => Self::RoomNotReady,
            "START_ALREADY" => Self::StartAlready,
            "COUNTDOWN_ACTIVE" => Self::CountdownActive,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u32, expected: u32 },
    #[error("unknown message type {0:?}")]
    UnknownMessageType(String),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Client -> server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub name: String,
    pub client_version: String,
    pub device: String,
    pub capabilities: CapabilityFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub tick: i64,
    pub axis_x: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// One entry of an input batch; `d` is the tick offset from the batch base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDelta {
    pub d: i64,
    pub axis_x: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBatch {
    pub start_tick: i64,
    pub frames: Vec<InputDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub t0: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconnect {
    pub player_id: String,
    pub resume_token: String,
    pub last_ack_tick: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadySet {
    pub ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_sec: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSelect {
    pub character_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum C2sMessage {
    Join(Join),
    Input(Input),
    InputBatch(InputBatch),
    Ping(Ping),
    Reconnect(Reconnect),
    ReadySet(ReadySet),
    StartRequest(StartRequest),
    CharacterSelect(CharacterSelect),
}

impl C2sMessage {
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Input(_) => "input",
            Self::InputBatch(_) => "input_batch",
            Self::Ping(_) => "ping",
            Self::Reconnect(_) => "reconnect",
            Self::ReadySet(_) => "ready_set",
            Self::StartRequest(_) => "start_request",
            Self::CharacterSelect(_) => "character_select",
        }
    }

    /// Input-class messages are the only ones subject to outbound rate
    /// limiting.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input(_) | Self::InputBatch(_))
    }
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: String,
    pub name: String,
    pub ready: bool,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub players: Vec<LobbyPlayer>,
    pub max_players: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorldCfg {
    pub world_width: f32,
    pub platform_width: f32,
    pub platform_height: f32,
    pub gap_min: f32,
    pub gap_max: f32,
    pub gravity: f32,
    pub jump_vy: f32,
    pub spring_vy: f32,
    pub max_vx: f32,
    pub tilt_accel: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDifficultyCfg {
    pub gap_min_start: f32,
    pub gap_min_end: f32,
    pub gap_max_start: f32,
    pub gap_max_end: f32,
    pub spring_chance_start: f32,
    pub spring_chance_end: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConfig {
    pub tps: u32,
    pub snapshot_rate_hz: u32,
    pub max_rollback_ticks: u32,
    pub input_lead_ticks: u32,
    pub world: NetWorldCfg,
    pub difficulty: NetDifficultyCfg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub player_id: String,
    pub resume_token: String,
    pub room_id: String,
    pub seed: String,
    pub role: Role,
    pub room_state: RoomState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby: Option<LobbySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfg: Option<NetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub room_state: RoomState,
    pub players: Vec<LobbyPlayer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCountdown {
    pub start_at_ms: i64,
    pub server_tick: i64,
    pub countdown_sec: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Start {
    pub start_tick: i64,
    pub server_tick: i64,
    pub server_time_ms: i64,
    pub tps: u32,
}

/// Per-entity snapshot entry. Every kinematic field is optional: absence
/// means the server did not include it this tick and the local value must be
/// left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetPlayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEventMsg {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_tick: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_input_seq: Option<u32>,
    #[serde(default)]
    pub full: bool,
    pub players: Vec<NetPlayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<GameEventMsg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub t0: i64,
    pub t1: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorMsg {
    pub fn net_code(&self) -> NetErrorCode {
        NetErrorCode::from_raw(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finish {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPresence {
    pub id: String,
    pub state: PresenceState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChanged {
    pub new_master_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum S2cMessage {
    Welcome(Welcome),
    LobbyState(LobbyState),
    StartCountdown(StartCountdown),
    Start(Start),
    Snapshot(Snapshot),
    Pong(Pong),
    Error(ErrorMsg),
    Finish(Finish),
    PlayerPresence(PlayerPresence),
    RoleChanged(RoleChanged),
}

impl S2cMessage {
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::LobbyState(_) => "lobby_state",
            Self::StartCountdown(_) => "start_countdown",
            Self::Start(_) => "start",
            Self::Snapshot(_) => "snapshot",
            Self::Pong(_) => "pong",
            Self::Error(_) => "error",
            Self::Finish(_) => "finish",
            Self::PlayerPresence(_) => "player_presence",
            Self::RoleChanged(_) => "role_changed",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope encode/decode
// ---------------------------------------------------------------------------

/// A decoded wire frame: the envelope header plus its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub kind: String,
    pub pv: u32,
    pub seq: u32,
    pub ts: i64,
    pub payload: T,
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    pv: u32,
    seq: u32,
    ts: i64,
    payload: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeShell<'a> {
    #[serde(rename = "type")]
    kind: String,
    pv: u32,
    #[serde(default)]
    seq: u32,
    #[serde(default)]
    ts: i64,
    #[serde(borrow)]
    payload: &'a RawValue,
}

fn encode_with<T: Serialize>(
    kind: &str,
    payload: &T,
    seq: u32,
    ts: i64,
) -> Result<String, ProtocolError> {
    let out = EnvelopeOut { kind, pv: PROTOCOL_VERSION, seq, ts, payload };
    Ok(serde_json::to_string(&out)?)
}

pub fn encode_c2s(msg: &C2sMessage, seq: u32, ts: i64) -> Result<String, ProtocolError> {
    let kind = msg.wire_type();
    match msg {
        C2sMessage::Join(p) => encode_with(kind, p, seq, ts),
        C2sMessage::Input(p) => encode_with(kind, p, seq, ts),
        C2sMessage::InputBatch(p) => encode_with(kind, p, seq, ts),
        C2sMessage::Ping(p) => encode_with(kind, p, seq, ts),
        C2sMessage::Reconnect(p) => encode_with(kind, p, seq, ts),
        C2sMessage::ReadySet(p) => encode_with(kind, p, seq, ts),
        C2sMessage::StartRequest(p) => encode_with(kind, p, seq, ts),
        C2sMessage::CharacterSelect(p) => encode_with(kind, p, seq, ts),
    }
}

pub fn encode_s2c(msg: &S2cMessage, seq: u32, ts: i64) -> Result<String, ProtocolError> {
    let kind = msg.wire_type();
    match msg {
        S2cMessage::Welcome(p) => encode_with(kind, p, seq, ts),
        S2cMessage::LobbyState(p) => encode_with(kind, p, seq, ts),
        S2cMessage::StartCountdown(p) => encode_with(kind, p, seq, ts),
        S2cMessage::Start(p) => encode_with(kind, p, seq, ts),
        S2cMessage::Snapshot(p) => encode_with(kind, p, seq, ts),
        S2cMessage::Pong(p) => encode_with(kind, p, seq, ts),
        S2cMessage::Error(p) => encode_with(kind, p, seq, ts),
        S2cMessage::Finish(p) => encode_with(kind, p, seq, ts),
        S2cMessage::PlayerPresence(p) => encode_with(kind, p, seq, ts),
        S2cMessage::RoleChanged(p) => encode_with(kind, p, seq, ts),
    }
}

fn decode_shell(text: &str) -> Result<EnvelopeShell<'_>, ProtocolError> {
    let shell: EnvelopeShell = serde_json::from_str(text)?;
    if shell.pv != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch { got: shell.pv, expected: PROTOCOL_VERSION });
    }
    Ok(shell)
}

/// Decode a server frame. Unknown message types are dropped (logged,
/// `Ok(None)`) so additive server deploys never break a live client;
/// malformed JSON and protocol version mismatches are errors.
pub fn decode_s2c(text: &str) -> Result<Option<Envelope<S2cMessage>>, ProtocolError> {
    let shell = decode_shell(text)?;
    let raw = shell.payload.get();
    let payload = match shell.kind.as_str() {
        "welcome" => S2cMessage::Welcome(serde_json::from_str(raw)?),
        "lobby_state" => S2cMessage::LobbyState(serde_json::from_str(raw)?),
        "start_countdown" => S2cMessage::StartCountdown(serde_json::from_str(raw)?),
        "start" => S2cMessage::Start(serde_json::from_str(raw)?),
        "snapshot" => S2cMessage::Snapshot(serde_json::from_str(raw)?),
        "pong" => S2cMessage::Pong(serde_json::from_str(raw)?),
        "error" => S2cMessage::Error(serde_json::from_str(raw)?),
        "finish" => S2cMessage::Finish(serde_json::from_str(raw)?),
        "player_presence" => S2cMessage::PlayerPresence(serde_json::from_str(raw)?),
        "role_changed" => S2cMessage::RoleChanged(serde_json::from_str(raw)?),
        other => {
            log::debug!("dropping unknown server message type {other:?}");
            return Ok(None);
        }
    };
    Ok(Some(Envelope { kind: shell.kind, pv: shell.pv, seq: shell.seq, ts: shell.ts, payload }))
}

/// Decode a client frame; used by test harnesses standing in for the server.
/// Unlike [`decode_s2c`] this is strict about unknown types.
pub fn decode_c2s(text: &str) -> Result<Envelope<C2sMessage>, ProtocolError> {
    let shell = decode_shell(text)?;
    let raw = shell.payload.get();
    let payload = match shell.kind.as_str() {
        "join" => C2sMessage::Join(serde_json::from_str(raw)?),
        "input" => C2sMessage::Input(serde_json::from_str(raw)?),
        "input_batch" => C2sMessage::InputBatch(serde_json::from_str(raw)?),
        "ping" => C2sMessage::Ping(serde_json::from_str(raw)?),
        "reconnect" => C2sMessage::Reconnect(serde_json::from_str(raw)?),
        "ready_set" => C2sMessage::ReadySet(serde_json::from_str(raw)?),
        "start_request" => C2sMessage::StartRequest(serde_json::from_str(raw)?),
        "character_select" => C2sMessage::CharacterSelect(serde_json::from_str(raw)?),
        other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
    };
    Ok(Envelope { kind: shell.kind, pv: shell.pv, seq: shell.seq, ts: shell.ts, payload })
}
