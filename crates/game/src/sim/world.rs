use glam::Vec2;

use super::rng::WorldRandom;

#[derive(Debug, Clone, Copy)]
pub struct GameConfig {
    pub world_width: f32,
    pub world_height_visible: f32,
    pub gravity: f32,
    pub jump_velocity: f32,
    pub horizontal_acceleration: f32,
    pub horizontal_friction: f32,
    pub max_horizontal_speed: f32,
    pub platform_spacing_min: f32,
    pub platform_spacing_max: f32,
    pub platform_width: f32,
    pub platform_half_height: f32,
    pub player_size: f32,
    pub death_height: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world_width: 6.0,
            world_height_visible: 10.0,
            gravity: -30.0,
            jump_velocity: 16.0,
            horizontal_acceleration: 50.0,
            horizontal_friction: 12.0,
            max_horizontal_speed: 9.0,
            platform_spacing_min: 1.4,
            platform_spacing_max: 2.4,
            platform_width: 1.6,
            platform_half_height: 0.2,
            player_size: 0.6,
            death_height: 12.0,
        }
    }
}

/// One tick's worth of local control state, sampled by the host platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameInput {
    pub tilt: f32,
    pub touch: bool,
    pub pause: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Platform {
    pub position: Vec2,
    pub half_extents: Vec2,
    pub spawned_tick: i64,
}

impl Platform {
    pub fn top(&self) -> f32 {
        self.position.y + self.half_extents.y
    }

    pub fn left(&self) -> f32 {
        self.position.x - self.half_extents.x
    }

    pub fn right(&self) -> f32 {
        self.position.x + self.half_extents.x
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub position: Vec2,
    pub last_position: Vec2,
    pub velocity: Vec2,
    pub half_size: f32,
    pub is_jumping: bool,
}

impl Player {
    fn new(size: f32) -> Self {
        Self {
            position: Vec2::ZERO,
            last_position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            half_size: size * 0.5,
            is_jumping: false,
        }
    }

    fn reset(&mut self, start: Vec2) {
        self.position = start;
        self.last_position = start;
        self.velocity = Vec2::ZERO;
        self.is_jumping = false;
    }

    pub fn bottom(&self) -> f32 {
        self.position.y - self.half_size
    }
}

#[derive(Debug, Clone, Default)]
pub struct Camera {
    pub y: f32,
    pub min_y: f32,
}

impl Camera {
    pub fn follow(&mut self, target_y: f32, lerp: f32) {
        self.y += (target_y - self.y) * lerp;
        if self.y < self.min_y {
            self.y = self.min_y;
        }
    }
}

/// The full deterministic simulation state. Everything the stepper touches
/// lives here; replaying the same seed and input sequence reproduces it
/// bit for bit.
#[derive(Debug, Clone)]
pub struct World {
    pub config: GameConfig,
    pub player: Player,
    pub camera: Camera,
    pub platforms: Vec<Platform>,
    pub score: f32,
    pub best_height: f32,
    pub tick: i64,
    pub seed: u64,
    pub random: WorldRandom,
    pub highest_platform_y: f32,
}

impl World {
    pub fn new(config: GameConfig, seed: u64) -> Self {
        let mut world = Self {
            config,
            player: Player::new(config.player_size),
            camera: Camera::default(),
            platforms: Vec::with_capacity(32),
            score: 0.0,
            best_height: 0.0,
            tick: 0,
            seed,
            random: WorldRandom::new(seed),
            highest_platform_y: 0.0,
        };
        world.reset(seed);
        world
    }

    pub fn reset(&mut self, seed: u64) {
        self.seed = seed;
        self.random.reseed(seed);
        self.tick = 0;
        self.score = 0.0;
        self.best_height = 0.0;
        self.highest_platform_y = 0.0;
        self.camera = Camera::default();
        self.player.reset(Vec2::new(0.0, 1.0));
        self.platforms.clear();
        // Base platform under the spawn point.
        self.platforms.push(Platform {
            position: Vec2::ZERO,
            half_extents: Vec2::new(self.config.platform_width * 0.5, self.config.platform_half_height),
            spawned_tick: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_base_platform() {
        let mut world = World::new(GameConfig::default(), 3);
        world.platforms.clear();
        world.tick = 99;
        world.reset(3);
        assert_eq!(world.tick, 0);
        assert_eq!(world.platforms.len(), 1);
        assert_eq!(world.platforms[0].position, Vec2::ZERO);
    }
}
