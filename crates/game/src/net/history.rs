use super::CompactState;

/// One tick's locally sampled input, as stored for replay and resend.
#[derive(Debug, Clone, Default)]
pub struct InputFrame {
    pub tick: i64,
    pub axis_x: f32,
    pub jump: bool,
    pub shoot: bool,
    pub checksum: Option<String>,
}

/// Sliding window of the most recent `N` ticks' inputs and predicted states.
///
/// Slots are addressed by `tick & (N - 1)`, so the capacity must be a power
/// of two. Writing a tick overwrites whatever older tick occupied the slot;
/// reads only hit when the slot's recorded tick matches the query exactly,
/// which makes wraparound safe without any bookkeeping beyond the tag.
#[derive(Debug)]
pub struct HistoryBuffer {
    mask: usize,
    input_tags: Vec<i64>,
    inputs: Vec<InputFrame>,
    state_tags: Vec<i64>,
    states: Vec<CompactState>,
}

const EMPTY: i64 = -1;

impl HistoryBuffer {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "history capacity must be a power of two, got {capacity}"
        );
        Self {
            mask: capacity - 1,
            input_tags: vec![EMPTY; capacity],
            inputs: vec![InputFrame::default(); capacity],
            state_tags: vec![EMPTY; capacity],
            states: vec![CompactState::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn slot(&self, tick: i64) -> usize {
        tick as usize & self.mask
    }

    pub fn put_input(&mut self, tick: i64, axis_x: f32, jump: bool, shoot: bool, checksum: Option<String>) {
        if tick < 0 {
            return;
        }
        let slot = self.slot(tick);
        let frame = &mut self.inputs[slot];
        frame.tick = tick;
        frame.axis_x = axis_x;
        frame.jump = jump;
        frame.shoot = shoot;
        frame.checksum = checksum;
        self.input_tags[slot] = tick;
    }

    pub fn input(&self, tick: i64) -> Option<&InputFrame> {
        if tick < 0 {
            return None;
        }
        let slot = self.slot(tick);
        (self.input_tags[slot] == tick).then(|| &self.inputs[slot])
    }

    /// Attach a checksum to an already-stored input frame.
    pub fn set_checksum(&mut self, tick: i64, checksum: String) -> bool {
        if tick < 0 {
            return false;
        }
        let slot = self.slot(tick);
        if self.input_tags[slot] != tick {
            return false;
        }
        self.inputs[slot].checksum = Some(checksum);
        true
    }

    pub fn put_state(&mut self, tick: i64, state: CompactState) {
        if tick < 0 {
            return;
        }
        let slot = self.slot(tick);
        self.states[slot] = state;
        self.state_tags[slot] = tick;
    }

    pub fn state(&self, tick: i64) -> Option<CompactState> {
        if tick < 0 {
            return None;
        }
        let slot = self.slot(tick);
        (self.state_tags[slot] == tick).then(|| self.states[slot])
    }

    /// Visit every stored input in `[from, to]` in ascending tick order.
    /// Ticks with no surviving entry are skipped.
    pub fn replay(&self, from: i64, to: i64, mut f: impl FnMut(&InputFrame)) {
        let mut tick = from.max(0);
        while tick <= to {
            if let Some(frame) = self.input(tick) {
                f(frame);
            }
            tick += 1;
        }
    }

    /// Invalidate entries that have fallen out of the retention window ending
    /// at `tick`, so stale slots can never satisfy a future replay.
    pub fn trim_before(&mut self, tick: i64) {
        let cutoff = tick - self.capacity() as i64;
        for tag in &mut self.input_tags {
            if *tag != EMPTY && *tag < cutoff {
                *tag = EMPTY;
            }
        }
        for tag in &mut self.state_tags {
            if *tag != EMPTY && *tag < cutoff {
                *tag = EMPTY;
            }
        }
    }

    pub fn reset(&mut self) {
        self.input_tags.fill(EMPTY);
        self.state_tags.fill(EMPTY);
        for frame in &mut self.inputs {
            frame.checksum = None;
        }
    }
}
