use std::sync::{Mutex, PoisonError};

use crate::error::ThrottleResult;
use crate::throttle_config::ThrottleConfig;
use crate::throttler::{Throttler, DEFAULT_EVENT_CAPACITY};

/// Holds the one shared [`Throttler`] of a process.
///
/// Owned by the composition root and handed to whoever needs the throttler,
/// instead of living in a global.
#[derive(Debug)]
pub struct ThrottlerRegistry {
    instance: Mutex<Option<Throttler>>,
    event_capacity: usize,
}

impl Default for ThrottlerRegistry {
    fn default() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl ThrottlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances created by this registry buffer this many events.
    pub fn with_event_capacity(event_capacity: usize) -> Self {
        Self {
            instance: Mutex::new(None),
            event_capacity,
        }
    }

    /// Returns the shared instance, creating it on first access.
    ///
    /// `config` is only used for creation; later calls ignore it.
    pub fn get_instance(&self, config: Option<ThrottleConfig>) -> ThrottleResult<Throttler> {
        let mut slot = self.instance.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let throttler =
            Throttler::with_event_capacity(config.unwrap_or_default(), self.event_capacity)?;
        *slot = Some(throttler.clone());
        Ok(throttler)
    }

    /// Stops and discards the shared instance, if any.
    pub fn reset_instance(&self) {
        let previous = self
            .instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(throttler) = previous {
            throttler.stop();
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
