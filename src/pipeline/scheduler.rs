/// Frame-skip policy: capture index `i` goes to inference iff `i % N == 0`.
///
/// The counter advances once per captured frame whatever the routing outcome,
/// and is never reset by reconnects.
#[derive(Debug)]
pub struct FrameScheduler {
    interval: u32,
    counter: u64,
}

impl FrameScheduler {
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
        }
    }

    /// Route the next captured frame.
    pub fn should_infer(&mut self) -> bool {
        let selected = is_selected(self.counter, self.interval);
        self.counter += 1;
        selected
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.max(1);
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Frames routed so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

pub fn is_selected(index: u64, interval: u32) -> bool {
    index % u64::from(interval.max(1)) == 0
}
