mod checksum;
mod history;
mod interpolation;
pub mod protocol;

pub use checksum::{CHECKSUM_INTERVAL, CHECKSUM_PLATFORM_SAMPLE, state_checksum_hex};
pub use history::{HistoryBuffer, InputFrame};
pub use interpolation::{
    DEFAULT_MAX_EXTRAPOLATION_MS, DEFAULT_SAMPLE_CAPACITY, InterpolationBuffer,
};
pub use protocol::{
    C2sMessage, CapabilityFlags, Envelope, NetErrorCode, PROTOCOL_VERSION, ProtocolError,
    S2cMessage, decode_c2s, decode_s2c, encode_c2s, encode_s2c, next_seq,
};

use crate::sim::World;

/// Minimal replicated kinematic state for one entity at one tick. Plain
/// value, copied freely between buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompactState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
}

impl CompactState {
    /// Snapshot the live world's player kinematics.
    pub fn capture(world: &World) -> Self {
        Self {
            x: world.player.position.x,
            y: world.player.position.y,
            vx: world.player.velocity.x,
            vy: world.player.velocity.y,
        }
    }

    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            vx: self.vx + (other.vx - self.vx) * t,
            vy: self.vy + (other.vy - self.vy) * t,
        }
    }
}
