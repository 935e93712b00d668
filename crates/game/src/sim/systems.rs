use glam::Vec2;

use super::world::{GameInput, Platform, World};

pub fn apply_input(world: &mut World, input: &GameInput, dt: f32) {
    let cfg = world.config;
    let player = &mut world.player;
    player.velocity.x += input.tilt * cfg.horizontal_acceleration * dt;
    player.velocity.x -= player.velocity.x * cfg.horizontal_friction * dt;
    player.velocity.x = player
        .velocity
        .x
        .clamp(-cfg.max_horizontal_speed, cfg.max_horizontal_speed);
}

pub fn integrate(world: &mut World, dt: f32) {
    let cfg = world.config;
    let player = &mut world.player;
    player.last_position = player.position;
    player.velocity.y += cfg.gravity * dt;
    player.position += player.velocity * dt;
    // Horizontal wrap keeps the playfield a cylinder.
    let half_width = cfg.world_width * 0.5;
    if player.position.x < -half_width {
        player.position.x += cfg.world_width;
        player.last_position.x += cfg.world_width;
    }
    if player.position.x > half_width {
        player.position.x -= cfg.world_width;
        player.last_position.x -= cfg.world_width;
    }
    let target = player.position.y - cfg.world_height_visible * 0.3;
    world.camera.follow(target, 0.1);
}

pub fn resolve_collisions(world: &mut World) {
    let player = &mut world.player;
    if player.velocity.y >= 0.0 {
        return;
    }
    let previous_bottom = player.last_position.y - player.half_size;
    for platform in &world.platforms {
        let platform_top = platform.top();
        if previous_bottom < platform_top {
            continue;
        }
        let overlaps = player.position.x + player.half_size >= platform.left()
            && player.position.x - player.half_size <= platform.right();
        if player.bottom() <= platform_top && overlaps {
            player.position.y = platform_top + player.half_size;
            player.velocity.y = world.config.jump_velocity;
            player.is_jumping = true;
            break;
        }
    }
}

pub fn update_spawns(world: &mut World) {
    let cfg = world.config;
    let camera_bottom = world.camera.y - cfg.world_height_visible;
    world.platforms.retain(|p| p.position.y >= camera_bottom);

    let target_top = world.camera.y + cfg.world_height_visible * 1.5;
    let mut highest = if world.platforms.is_empty() {
        world.player.position.y
    } else {
        world.highest_platform_y
    };
    let half_width = cfg.world_width * 0.5;
    let half_platform = cfg.platform_width * 0.5;
    while highest < target_top {
        let spacing = world
            .random
            .next_range(cfg.platform_spacing_min, cfg.platform_spacing_max);
        let y = highest + spacing;
        let x = world
            .random
            .next_range(-half_width + half_platform, half_width - half_platform);
        world.platforms.push(Platform {
            position: Vec2::new(x, y),
            half_extents: Vec2::new(half_platform, cfg.platform_half_height),
            spawned_tick: world.tick,
        });
        highest = y;
    }
    world.highest_platform_y = world.highest_platform_y.max(highest);
}

/// Returns false once the player has fallen out of the world.
pub fn update_score(world: &mut World) -> bool {
    world.best_height = world.best_height.max(world.player.position.y);
    world.score = world.best_height;
    let fail_height = world.camera.y - world.config.death_height;
    world.player.bottom() >= fail_height
}
