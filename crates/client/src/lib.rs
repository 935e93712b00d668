pub mod controller;
pub mod credentials;
pub mod loopback;
pub mod repository;
pub mod rooms;
pub mod transport;

pub use controller::{
    Phase, RemotePlayerView, SessionConfig, SessionController, SessionStatus,
};
pub use credentials::{
    CredentialStore, MemoryCredentialStore, SharedCredentialStore, StoredCredentials,
};
pub use loopback::{LoopbackConnector, LoopbackPeer};
pub use repository::{ConnectionSettings, SessionRepository};
pub use rooms::{RoomsApi, RoomsError};
pub use transport::{
    Backoff, Clock, LinkSnapshot, OutboundFrame, SocketConnector, SocketEvent, SocketSession,
    TokenBucket, Transport, TransportError, TransportEvent, system_clock,
};
