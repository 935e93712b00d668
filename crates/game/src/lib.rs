pub mod net;
pub mod sim;

pub use net::{
    C2sMessage, CHECKSUM_INTERVAL, CapabilityFlags, CompactState, Envelope, HistoryBuffer,
    InputFrame, InterpolationBuffer, NetErrorCode, PROTOCOL_VERSION, ProtocolError, S2cMessage,
    decode_c2s, decode_s2c, encode_c2s, encode_s2c, state_checksum_hex,
};
pub use sim::{
    DEFAULT_TICK_RATE, FixedTimestep, GameConfig, GameInput, GameSession, SessionPhase, World,
    WorldRandom,
};
