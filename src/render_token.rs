use crate::error::RenderError;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Monotonic render generation shared between a reader and its renders.
///
/// Every navigation issues a new ticket; issuing one silently supersedes
/// every ticket handed out before it.
#[derive(Clone, Debug, Default)]
pub struct RenderGeneration {
    current: Arc<AtomicU64>,
}

impl RenderGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RenderTicket {
        let id = self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        RenderTicket {
            id,
            current: Arc::clone(&self.current),
        }
    }

    /// Supersede all outstanding tickets without starting a new render.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }

    pub fn latest(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub struct RenderTicket {
    id: u64,
    current: Arc<AtomicU64>,
}

impl RenderTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.id
    }

    pub fn check(&self, stage: &'static str) -> Result<(), RenderError> {
        if !self.is_current() {
            return Err(RenderError::Superseded { stage });
        }
        Ok(())
    }
}
