use std::fmt;

///
/// ErrorTree
///
/// Flat accumulator for validation failures, optionally prefixed with the
/// route of the node that produced them. Collected across both validation
/// phases before being surfaced as one error.
///

#[derive(Clone, Debug, Default)]
pub struct ErrorTree {
    errors: Vec<String>,
}

impl ErrorTree {
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Record one failure.
    pub fn add(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Record one failure under a node route.
    pub fn add_route(&mut self, route: &str, err: impl fmt::Display) {
        self.errors.push(format!("{route}: {err}"));
    }

    /// Absorb another tree's failures.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    /// Collapse into a result; `Err` carries every accumulated failure.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ErrorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.join("; "))
    }
}

impl std::error::Error for ErrorTree {}

/// Push a formatted failure onto an [`ErrorTree`].
#[macro_export]
macro_rules! err {
    ($errs:expr, $($arg:tt)*) => {
        $errs.add(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::ErrorTree;

    #[test]
    fn empty_tree_collapses_to_ok() {
        let errs = ErrorTree::new();
        assert!(errs.result().is_ok());
    }

    #[test]
    fn accumulated_failures_join_in_order() {
        let mut errs = ErrorTree::new();
        err!(errs, "first {}", 1);
        errs.add_route("Entity.a", "second");

        let err = errs.result().expect_err("non-empty tree should be an error");
        assert_eq!(err.to_string(), "first 1; Entity.a: second");
    }
}
