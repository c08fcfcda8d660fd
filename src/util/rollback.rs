//! Transactional helper for multi-stage initialization.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::Result;

/// Run `main`; if it fails, run `rollback` and propagate the error.
///
/// Used by coop registration, where a failed stage must undo everything the
/// earlier stages acquired.
pub(crate) fn run_with_rollback<T>(
    main: impl FnOnce() -> Result<T>,
    rollback: impl FnOnce(),
) -> Result<T> {
    match main() {
        Ok(value) => Ok(value),
        Err(err) => {
            rollback();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_rollback_not_invoked_on_success() {
        let mut rolled_back = false;
        let result = run_with_rollback(|| Ok(42), || rolled_back = true);
        assert_eq!(result, Ok(42));
        assert!(!rolled_back);
    }

    #[test]
    fn test_rollback_invoked_on_failure() {
        let mut rolled_back = false;
        let result: Result<()> =
            run_with_rollback(|| Err(Error::EmptyName), || rolled_back = true);
        assert_eq!(result, Err(Error::EmptyName));
        assert!(rolled_back);
    }
}
