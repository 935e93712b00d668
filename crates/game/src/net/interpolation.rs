use std::collections::HashMap;

use super::CompactState;

pub const DEFAULT_SAMPLE_CAPACITY: usize = 128;
pub const DEFAULT_MAX_EXTRAPOLATION_MS: i64 = 150;

/// Fixed-capacity FIFO of timed samples for one remote entity. Sample times
/// are non-decreasing per entity because the transport stream is ordered.
#[derive(Debug)]
struct SampleRing {
    times: Vec<i64>,
    states: Vec<CompactState>,
    head: usize,
    len: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            times: vec![0; capacity],
            states: vec![CompactState::default(); capacity],
            head: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.times.len()
    }

    fn push(&mut self, time_ms: i64, state: CompactState) {
        let capacity = self.capacity();
        let index = (self.head + self.len) % capacity;
        self.times[index] = time_ms;
        self.states[index] = state;
        if self.len == capacity {
            // Full: the oldest sample was just overwritten.
            self.head = (self.head + 1) % capacity;
        } else {
            self.len += 1;
        }
    }

    fn get(&self, logical: usize) -> (i64, &CompactState) {
        let index = (self.head + logical) % self.capacity();
        (self.times[index], &self.states[index])
    }

    fn pop_oldest(&mut self) {
        debug_assert!(self.len > 0);
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
    }
}

/// Per-remote-entity time-indexed sample buffers used to render other
/// players smoothly despite irregular snapshot arrival.
#[derive(Debug)]
pub struct InterpolationBuffer {
    capacity: usize,
    max_extrapolation_ms: i64,
    rings: HashMap<String, SampleRing>,
}

impl InterpolationBuffer {
    /// `capacity` is the per-entity sample count and must be a power of two.
    pub fn new(capacity: usize, max_extrapolation_ms: i64) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "sample capacity must be a power of two, got {capacity}"
        );
        Self {
            capacity,
            max_extrapolation_ms,
            rings: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY, DEFAULT_MAX_EXTRAPOLATION_MS)
    }

    /// Append a sample for `entity_id`, creating its ring on first sight.
    /// A full ring evicts its oldest sample.
    pub fn push(&mut self, entity_id: &str, sample_time_ms: i64, state: CompactState) {
        if let Some(ring) = self.rings.get_mut(entity_id) {
            ring.push(sample_time_ms, state);
        } else {
            let mut ring = SampleRing::new(self.capacity);
            ring.push(sample_time_ms, state);
            self.rings.insert(entity_id.to_string(), ring);
        }
    }

    /// Resolve `entity_id` at `render_time_ms` into `out`.
    ///
    /// Render times older than the retained window clamp to the oldest
    /// sample; times inside it interpolate linearly between the bracketing
    /// samples; times up to `max_extrapolation_ms` past the newest sample
    /// extrapolate position from the newest velocity (world units per
    /// second, so the millisecond delta is scaled down). Anything further
    /// returns the newest sample unmodified and reports failure so callers
    /// can hold the last known state.
    pub fn sample(&self, entity_id: &str, render_time_ms: i64, out: &mut CompactState) -> bool {
        let Some(ring) = self.rings.get(entity_id) else {
            return false;
        };
        if ring.len == 0 {
            return false;
        }

        let (oldest_time, oldest) = ring.get(0);
        if render_time_ms <= oldest_time {
            *out = *oldest;
            return true;
        }

        for i in 0..ring.len - 1 {
            let (t0, s0) = ring.get(i);
            let (t1, s1) = ring.get(i + 1);
            if render_time_ms < t0 || render_time_ms > t1 {
                continue;
            }
            let span = t1 - t0;
            let fraction = if span > 0 {
                (render_time_ms - t0) as f32 / span as f32
            } else {
                0.0
            };
            *out = s0.lerp(s1, fraction);
            return true;
        }

        let (newest_time, newest) = ring.get(ring.len - 1);
        let ahead_ms = render_time_ms - newest_time;
        *out = *newest;
        if ahead_ms > self.max_extrapolation_ms {
            return false;
        }
        let ahead_s = ahead_ms as f32 / 1000.0;
        out.x += out.vx * ahead_s;
        out.y += out.vy * ahead_s;
        true
    }

    /// Drop samples older than `render_time_ms - keep_window_ms` from every
    /// entity. Called once per frame so memory stays bounded regardless of
    /// push rate. Entities themselves survive until [`remove`](Self::remove).
    pub fn prune(&mut self, render_time_ms: i64, keep_window_ms: i64) {
        let cutoff = render_time_ms - keep_window_ms;
        for ring in self.rings.values_mut() {
            while ring.len > 1 && ring.get(0).0 < cutoff {
                ring.pop_oldest();
            }
        }
    }

    pub fn remove(&mut self, entity_id: &str) {
        self.rings.remove(entity_id);
    }

    pub fn clear(&mut self) {
        self.rings.clear();
    }

    pub fn entity_count(&self) -> usize {
        self.rings.len()
    }
}
