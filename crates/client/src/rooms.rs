//! Typed surface of the matchmaking/lobby REST endpoints. Only consumed
//! here: the host supplies the HTTP implementation, and each response hands
//! back enough (`ws_url` + `ws_token`) to open the realtime connection.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use updraft::net::protocol::{NetErrorCode, Role, RoomState};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RoomsError {
    #[error("lobby api returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<NetErrorCode>,
        message: String,
        retry_after_sec: Option<u64>,
    },
    #[error("lobby request failed: {0}")]
    Network(String),
    #[error("malformed lobby response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub seed: String,
    pub region: String,
    pub ws_url: String,
    pub ws_token: String,
    pub role: Role,
    pub state: RoomState,
    pub max_players: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub room_id: String,
    pub ws_url: String,
    pub ws_token: String,
    pub role: Role,
    pub state: RoomState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyRequest {
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRequest {
    pub character_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRoomRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub countdown_sec: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRoomResponse {
    pub state: RoomState,
    pub start_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRegion {
    pub id: String,
    pub ping_ms: u32,
    pub ws_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub regions: Vec<StatusRegion>,
    pub server_pv: u32,
}

/// The lobby endpoints this client calls. Implementations own the HTTP
/// stack; futures are boxed so the trait stays object-safe.
pub trait RoomsApi: Send + Sync {
    fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> BoxFuture<Result<CreateRoomResponse, RoomsError>>;
    fn join_room(
        &self,
        room_id: &str,
        request: JoinRoomRequest,
    ) -> BoxFuture<Result<JoinRoomResponse, RoomsError>>;
    fn leave_room(&self, room_id: &str) -> BoxFuture<Result<(), RoomsError>>;
    fn set_ready(&self, room_id: &str, request: ReadyRequest) -> BoxFuture<Result<(), RoomsError>>;
    fn set_character(
        &self,
        room_id: &str,
        request: CharacterRequest,
    ) -> BoxFuture<Result<(), RoomsError>>;
    fn start_room(
        &self,
        room_id: &str,
        request: StartRoomRequest,
    ) -> BoxFuture<Result<StartRoomResponse, RoomsError>>;
    fn status(&self) -> BoxFuture<Result<StatusResponse, RoomsError>>;
}
