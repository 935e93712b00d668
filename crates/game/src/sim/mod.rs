mod rng;
mod systems;
mod world;

pub use rng::WorldRandom;
pub use world::{Camera, GameConfig, GameInput, Platform, Player, World};

pub const DEFAULT_TICK_RATE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Running,
    Paused,
    GameOver,
}

/// The deterministic stepping function. `step` advances exactly one fixed
/// tick; callers must invoke it in strictly increasing tick order with the
/// same `dt` for replays to reproduce the original run.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub world: World,
    phase: SessionPhase,
}

impl GameSession {
    pub fn new(config: GameConfig, seed: u64) -> Self {
        Self {
            world: World::new(config, seed),
            phase: SessionPhase::Running,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn step(&mut self, input: &GameInput, dt: f32) {
        if self.phase == SessionPhase::Paused {
            if input.pause {
                self.phase = SessionPhase::Running;
            }
            return;
        }
        if self.phase != SessionPhase::Running {
            return;
        }
        if input.pause {
            self.phase = SessionPhase::Paused;
            return;
        }
        systems::apply_input(&mut self.world, input, dt);
        systems::integrate(&mut self.world, dt);
        systems::resolve_collisions(&mut self.world);
        systems::update_spawns(&mut self.world);
        if !systems::update_score(&mut self.world) {
            self.phase = SessionPhase::GameOver;
        }
        self.world.tick += 1;
    }

    pub fn restart(&mut self, seed: u64) {
        self.world.reset(seed);
        self.phase = SessionPhase::Running;
    }
}

/// Accumulator that converts variable render deltas into fixed ticks.
pub struct FixedTimestep {
    step: f32,
    max_frame_delta: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            step: 1.0 / tick_rate as f32,
            max_frame_delta: 0.25,
            accumulator: 0.0,
        }
    }

    pub fn dt(&self) -> f32 {
        self.step
    }

    pub fn advance(&mut self, elapsed: f32, mut stepper: impl FnMut(f32)) -> u32 {
        self.accumulator += elapsed.clamp(0.0, self.max_frame_delta);
        let mut ticks = 0;
        while self.accumulator >= self.step {
            stepper(self.step);
            self.accumulator -= self.step;
            ticks += 1;
        }
        ticks
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.step
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    #[test]
    fn equal_seed_and_inputs_stay_bit_identical() {
        let mut a = GameSession::new(GameConfig::default(), 99);
        let mut b = GameSession::new(GameConfig::default(), 99);
        let input = GameInput {
            tilt: 0.4,
            ..GameInput::default()
        };
        for _ in 0..600 {
            a.step(&input, DT);
            b.step(&input, DT);
        }
        assert_eq!(a.world.tick, b.world.tick);
        assert_eq!(a.world.player.position, b.world.player.position);
        assert_eq!(a.world.player.velocity, b.world.player.velocity);
        assert_eq!(a.world.platforms.len(), b.world.platforms.len());
    }

    #[test]
    fn step_advances_one_tick() {
        let mut session = GameSession::new(GameConfig::default(), 1);
        session.step(&GameInput::default(), DT);
        assert_eq!(session.world.tick, 1);
    }

    #[test]
    fn pause_gates_ticking() {
        let mut session = GameSession::new(GameConfig::default(), 1);
        let pause = GameInput {
            pause: true,
            ..GameInput::default()
        };
        session.step(&pause, DT);
        assert_eq!(session.phase(), SessionPhase::Paused);
        let tick = session.world.tick;
        session.step(&GameInput::default(), DT);
        assert_eq!(session.world.tick, tick);
    }

    #[test]
    fn restart_rewinds_to_fresh_world() {
        let mut session = GameSession::new(GameConfig::default(), 1);
        for _ in 0..120 {
            session.step(&GameInput::default(), DT);
        }
        session.restart(7);
        assert_eq!(session.world.tick, 0);
        assert_eq!(session.world.seed, 7);
        assert_eq!(session.phase(), SessionPhase::Running);
    }

    #[test]
    fn fixed_timestep_accumulates_whole_ticks() {
        let mut ts = FixedTimestep::new(60);
        let mut count = 0;
        ts.advance(1.0 / 30.0, |_| count += 1);
        assert_eq!(count, 2);
        ts.advance(1.0 / 120.0, |_| count += 1);
        assert_eq!(count, 2);
        ts.advance(1.0 / 120.0, |_| count += 1);
        assert_eq!(count, 3);
    }
}
