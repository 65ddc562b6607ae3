use keepsake_common::PersistentId;

/// Highest id the allocator issues or adopts. `u64::MAX` is never used.
pub const MAX_ID: u64 = u64::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("persistent ids exhausted at watermark {0}")]
    Exhausted(u64),
    #[error("id {0} is outside the issuable range")]
    OutOfRange(u64),
    #[error("id {0} is already in use")]
    Taken(PersistentId),
}

/// Monotonic generator for persistent ids.
///
/// The watermark is the last id handed out. It is written as the final field
/// of every save and restored on load before the reconciler needs new ids.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    watermark: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next id, or fail once `MAX_ID` has been handed out.
    pub fn generate(&mut self) -> Result<PersistentId, IdError> {
        let next = self
            .watermark
            .checked_add(1)
            .filter(|&next| next <= MAX_ID)
            .ok_or(IdError::Exhausted(self.watermark))?;
        self.watermark = next;
        Ok(PersistentId(next))
    }

    /// Highest id issued so far.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Adopt a watermark read from a save.
    ///
    /// Never moves backwards: ids issued before the load stay unique after it.
    pub fn restore(&mut self, saved: u64) -> Result<(), IdError> {
        if saved > MAX_ID {
            return Err(IdError::OutOfRange(saved));
        }
        if saved > self.watermark {
            self.watermark = saved;
        }
        Ok(())
    }

    /// Account for an id that entered the world without being generated here.
    pub fn observe(&mut self, id: PersistentId) -> Result<(), IdError> {
        self.restore(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_strictly_increasing() {
        let mut ids = IdAllocator::new();
        let a = ids.generate().unwrap();
        let b = ids.generate().unwrap();
        assert_eq!(a, PersistentId(1));
        assert!(b > a);
        assert_eq!(ids.watermark(), 2);
    }

    #[test]
    fn restore_never_lowers_watermark() {
        let mut ids = IdAllocator::new();
        for _ in 0..10 {
            ids.generate().unwrap();
        }
        ids.restore(4).unwrap();
        assert_eq!(ids.generate(), Ok(PersistentId(11)));

        ids.restore(100).unwrap();
        assert_eq!(ids.generate(), Ok(PersistentId(101)));
    }

    #[test]
    fn observe_skips_past_foreign_ids() {
        let mut ids = IdAllocator::new();
        ids.observe(PersistentId(7)).unwrap();
        assert_eq!(ids.generate(), Ok(PersistentId(8)));
    }

    #[test]
    fn out_of_range_watermark_is_refused() {
        let mut ids = IdAllocator::new();
        ids.generate().unwrap();
        assert_eq!(ids.restore(u64::MAX), Err(IdError::OutOfRange(u64::MAX)));
        assert_eq!(ids.observe(PersistentId(u64::MAX)), Err(IdError::OutOfRange(u64::MAX)));
        assert_eq!(ids.watermark(), 1);
        assert_eq!(ids.generate(), Ok(PersistentId(2)));
    }

    #[test]
    fn exhausted_allocator_errors_instead_of_wrapping() {
        let mut ids = IdAllocator::new();
        ids.restore(MAX_ID - 1).unwrap();
        assert_eq!(ids.generate(), Ok(PersistentId(MAX_ID)));
        assert_eq!(ids.generate(), Err(IdError::Exhausted(MAX_ID)));
        assert_eq!(ids.generate(), Err(IdError::Exhausted(MAX_ID)));
        assert_eq!(ids.watermark(), MAX_ID);
    }
}
