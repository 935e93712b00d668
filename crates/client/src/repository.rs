use crate::controller::{SessionConfig, SessionController};
use crate::credentials::{CredentialStore, SharedCredentialStore};
use crate::rooms::{
    CharacterRequest, CreateRoomRequest, CreateRoomResponse, JoinRoomRequest, JoinRoomResponse,
    ReadyRequest, RoomsApi, RoomsError, StartRoomRequest, StartRoomResponse,
};

/// Connection parameters that survive across rooms.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub player_name: String,
    pub client_version: String,
    pub device: String,
    pub use_input_batch: bool,
    pub interpolation_delay_ms: i64,
}

/// Glue between the lobby REST endpoints and the realtime session: resolves
/// a room into a socket URL/token, hands it to the controller, and keeps
/// enough state to refresh or leave cleanly.
pub struct SessionRepository {
    rooms: Box<dyn RoomsApi>,
    controller: SessionController,
    credentials: Option<SharedCredentialStore>,
    settings: ConnectionSettings,
    active_room_id: Option<String>,
    active_ws_url: Option<String>,
    active_ws_token: Option<String>,
}

impl SessionRepository {
    pub fn new(
        rooms: Box<dyn RoomsApi>,
        controller: SessionController,
        credentials: Option<SharedCredentialStore>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            rooms,
            controller,
            credentials,
            settings,
            active_room_id: None,
            active_ws_url: None,
            active_ws_token: None,
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SessionController {
        &mut self.controller
    }

    pub async fn create_room(
        &mut self,
        region: Option<String>,
        max_players: Option<u32>,
        mode: Option<String>,
    ) -> Result<CreateRoomResponse, RoomsError> {
        let response = self
            .rooms
            .create_room(CreateRoomRequest {
                name: self.settings.player_name.clone(),
                region,
                max_players,
                mode,
            })
            .await?;
        self.adopt_room(&response.room_id, &response.ws_url, &response.ws_token);
        Ok(response)
    }

    pub async fn join_room(&mut self, room_id: &str) -> Result<JoinRoomResponse, RoomsError> {
        let response = self
            .rooms
            .join_room(room_id, JoinRoomRequest { name: self.settings.player_name.clone() })
            .await?;
        self.adopt_room(&response.room_id, &response.ws_url, &response.ws_token);
        Ok(response)
    }

    /// Leave the active room. The REST call is best-effort; the realtime
    /// session always stops, and stored credentials are cleared unless the
    /// caller wants to resume later.
    pub async fn leave_room(&mut self, clear_credentials: bool) -> Result<(), RoomsError> {
        let Some(room_id) = self.active_room_id.take() else {
            return Ok(());
        };
        if let Err(error) = self.rooms.leave_room(&room_id).await {
            log::warn!("leave room failed: {error}");
        }
        self.controller.stop();
        if clear_credentials {
            if let Some(credentials) = self.credentials.as_mut() {
                credentials.clear();
            }
        }
        self.active_ws_url = None;
        self.active_ws_token = None;
        Ok(())
    }

    pub async fn set_ready(&mut self, ready: bool) -> Result<(), RoomsError> {
        let Some(room_id) = self.active_room_id.clone() else {
            return Ok(());
        };
        self.rooms.set_ready(&room_id, ReadyRequest { ready }).await
    }

    pub async fn set_character(&mut self, character_id: &str) -> Result<(), RoomsError> {
        let Some(room_id) = self.active_room_id.clone() else {
            return Ok(());
        };
        self.rooms
            .set_character(&room_id, CharacterRequest { character_id: character_id.to_string() })
            .await
    }

    pub async fn start_room(
        &mut self,
        countdown_sec: Option<u32>,
    ) -> Result<Option<StartRoomResponse>, RoomsError> {
        let Some(room_id) = self.active_room_id.clone() else {
            return Ok(None);
        };
        let response = self
            .rooms
            .start_room(&room_id, StartRoomRequest { countdown_sec })
            .await?;
        Ok(Some(response))
    }

    /// Re-resolve the active room into a fresh socket URL/token, e.g. after
    /// the old token expired during a long outage.
    pub async fn refresh_socket(&mut self) -> Result<bool, RoomsError> {
        let Some(room_id) = self.active_room_id.clone() else {
            return Ok(false);
        };
        let response = self
            .rooms
            .join_room(&room_id, JoinRoomRequest { name: self.settings.player_name.clone() })
            .await?;
        self.adopt_room(&response.room_id, &response.ws_url, &response.ws_token);
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    fn adopt_room(&mut self, room_id: &str, ws_url: &str, ws_token: &str) {
        self.active_room_id = Some(room_id.to_string());
        self.active_ws_url = Some(ws_url.to_string());
        self.active_ws_token = Some(ws_token.to_string());
        let separator = if ws_url.contains('?') { '&' } else { '?' };
        self.controller.start(SessionConfig {
            ws_url: format!("{ws_url}{separator}token={ws_token}"),
            player_name: self.settings.player_name.clone(),
            client_version: self.settings.client_version.clone(),
            device: self.settings.device.clone(),
            use_input_batch: self.settings.use_input_batch,
            interpolation_delay_ms: self.settings.interpolation_delay_ms,
        });
    }
}
