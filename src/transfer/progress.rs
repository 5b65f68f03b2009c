use crate::{RelayError, Result};

/// Bytes accumulated against a declared total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    accumulated: u64,
    total: u64,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            accumulated: 0,
            total,
        }
    }

    /// Adds `count` bytes and reports whether the transfer is now complete.
    /// Going past the total is an error and leaves the progress untouched.
    pub fn advance(&mut self, count: u64) -> Result<bool> {
        self.check(count)?;
        self.accumulated += count;
        Ok(self.is_complete())
    }

    /// Fails if `count` more bytes would overrun the total.
    pub fn check(&self, count: u64) -> Result<()> {
        match self.accumulated.checked_add(count) {
            Some(next) if next <= self.total => Ok(()),
            next => Err(RelayError::SizeInvariant {
                accumulated: next.unwrap_or(u64::MAX),
                total: self.total,
            }),
        }
    }

    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.accumulated
    }

    pub fn is_complete(&self) -> bool {
        self.accumulated == self.total
    }

    pub fn percentage(&self) -> f32 {
        if self.total > 0 {
            (self.accumulated as f32 / self.total as f32) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_sum_completes_on_last_call() {
        let splits: [&[u64]; 4] = [&[10], &[1, 9], &[3, 3, 3, 1], &[0, 5, 0, 5]];
        for split in splits {
            let mut progress = TransferProgress::new(10);
            let (last, init) = split.split_last().unwrap();
            for &count in init {
                assert!(!progress.advance(count).unwrap());
            }
            assert!(progress.advance(*last).unwrap());
            assert_eq!(progress.remaining(), 0);
        }
    }

    #[test]
    fn test_overrun_is_error_not_clamp() {
        let mut progress = TransferProgress::new(10);
        progress.advance(8).unwrap();

        let err = progress.advance(3).unwrap_err();
        assert!(matches!(
            err,
            RelayError::SizeInvariant {
                accumulated: 11,
                total: 10
            }
        ));
        assert_eq!(progress.accumulated(), 8);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_percentage() {
        let mut progress = TransferProgress::new(200);
        progress.advance(50).unwrap();
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(TransferProgress::new(0).percentage(), 0.0);
    }
}
