use super::CompactState;
use crate::sim::World;

/// Ticks between checksummed input frames; every tick would cost too much
/// bandwidth for what is only an opportunistic desync probe.
pub const CHECKSUM_INTERVAL: i64 = 20;

/// How many active platforms are folded into the hash, in simulation
/// iteration order.
pub const CHECKSUM_PLATFORM_SAMPLE: usize = 4;

const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

fn mix(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a 64 over the raw IEEE-754 bit patterns of the player state, the
/// tick, and a bounded sample of platform geometry. All integers are hashed
/// little-endian. Operating on bit patterns (never on formatted text) keeps
/// the digest identical across platforms for identical simulations.
///
/// Rendered as lowercase hex without leading-zero padding.
pub fn state_checksum_hex(state: &CompactState, tick: i64, world: &World) -> String {
    let mut hash = FNV_OFFSET_BASIS;
    for value in [state.x, state.y, state.vx, state.vy] {
        hash = mix(hash, &value.to_bits().to_le_bytes());
    }
    hash = mix(hash, &(tick as u64).to_le_bytes());
    for platform in world.platforms.iter().take(CHECKSUM_PLATFORM_SAMPLE) {
        for value in [
            platform.position.x,
            platform.position.y,
            platform.half_extents.x,
            platform.half_extents.y,
        ] {
            hash = mix(hash, &value.to_bits().to_le_bytes());
        }
    }
    format!("{hash:x}")
}
