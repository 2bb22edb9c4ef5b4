use serde::{Deserialize, Serialize};

/// Tick-driven token bucket.
///
/// Capacity equals the configured rate per minute. Each refill tick grants
/// `ceil(rate / 60)` tokens, so a one second tick approximates the nominal
/// per-minute throughput.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_per_tick: u32,
}

impl TokenBucket {
    /// Creates a full bucket for the given rate per minute.
    pub fn new(rate_per_minute: u32) -> Self {
        Self {
            capacity: rate_per_minute,
            tokens: rate_per_minute,
            refill_per_tick: Self::refill_for(rate_per_minute),
        }
    }

    fn refill_for(rate_per_minute: u32) -> u32 {
        rate_per_minute.div_ceil(60)
    }

    pub fn try_consume(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&self) -> u32 {
        self.tokens
    }

    pub fn has_tokens(&self) -> bool {
        self.tokens > 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_per_tick(&self) -> u32 {
        self.refill_per_tick
    }

    /// Applies one refill tick. Returns true when the token count grew.
    pub fn refill(&mut self) -> bool {
        let previous = self.tokens;
        self.tokens = self
            .tokens
            .saturating_add(self.refill_per_tick)
            .min(self.capacity);
        self.tokens > previous
    }

    /// Retargets the bucket to a new rate. Never adds tokens; only clamps
    /// them down to the new capacity.
    pub fn set_rate(&mut self, rate_per_minute: u32) {
        self.capacity = rate_per_minute;
        self.refill_per_tick = Self::refill_for(rate_per_minute);
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
    }
}
