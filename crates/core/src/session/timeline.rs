use std::time::Duration;

/// Maps 32-bit RTP timestamps of one media onto a monotonically extended
/// clock, relative to the first timestamp seen.
///
/// Wraparound is detected by interpreting the difference to the previous
/// timestamp as a signed 32-bit value. Timestamps that step backwards
/// (reordering, B-frame RTP stamps) clamp to zero instead of underflowing.
#[derive(Debug, Clone)]
pub struct Timeline {
    clock_rate: u32,
    start: Option<i64>,
    last_raw: u32,
    extended: i64,
}

impl Timeline {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            start: None,
            last_raw: 0,
            extended: 0,
        }
    }

    /// Position of `timestamp` on the media clock.
    pub fn advance(&mut self, timestamp: u32) -> Duration {
        let start = match self.start {
            Some(start) => {
                let delta = timestamp.wrapping_sub(self.last_raw) as i32;
                self.extended += i64::from(delta);
                start
            }
            None => {
                self.extended = i64::from(timestamp);
                self.start = Some(self.extended);
                self.extended
            }
        };
        self.last_raw = timestamp;

        let ticks = u64::try_from(self.extended - start).unwrap_or(0);
        let rate = u64::from(self.clock_rate);
        Duration::from_secs(ticks / rate)
            + Duration::from_nanos((ticks % rate) * 1_000_000_000 / rate)
    }
}
