//! Single-vs-multi connection admission.

/// Outcome of an admission check.
///
/// `Rejected` is not an error: the attempt is dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Admit iff multi-connection mode is on or no channel is registered.
///
/// Single mode is one global slot, not one slot per peer. Applied identically to
/// inbound and outbound attempts.
pub fn admit(current_size: usize, allow_multi: bool) -> Admission {
    if allow_multi || current_size == 0 {
        Admission::Admitted
    } else {
        Admission::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mode_admits_only_into_empty_registry() {
        assert_eq!(admit(0, false), Admission::Admitted);
        assert_eq!(admit(1, false), Admission::Rejected);
        assert_eq!(admit(7, false), Admission::Rejected);
    }

    #[test]
    fn test_multi_mode_always_admits() {
        for size in [0, 1, 1000] {
            assert!(admit(size, true).is_admitted());
        }
    }
}
