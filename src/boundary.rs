//! Fault isolation around mounted components.
//!
//! Exceptions thrown by render, effects, handlers or timers are caught inside
//! the engine prelude and reported per mount; this module holds the host-side
//! pieces: the crash message shown to users and the ordered disposer registry
//! drained when a mount is torn down.

/// Shown for every runtime crash. The usual cause is reading fields of data
/// that has not arrived yet.
pub const CRASH_HINT: &str =
    "This oracle tried to use data before it finished loading. Regenerate it or refine the request.";

pub fn crash_message(raw: &str) -> String {
    let first_line = raw.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        CRASH_HINT.to_string()
    } else {
        format!("{CRASH_HINT} ({first_line})")
    }
}

/// Disposers registered by a mount, run once in registration order.
#[derive(Debug)]
pub struct CleanupRegistry<D> {
    disposers: Vec<D>,
}

impl<D> Default for CleanupRegistry<D> {
    fn default() -> Self {
        Self {
            disposers: Vec::new(),
        }
    }
}

impl<D> CleanupRegistry<D> {
    pub fn register(&mut self, disposer: D) {
        self.disposers.push(disposer);
    }

    pub fn len(&self) -> usize {
        self.disposers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposers.is_empty()
    }

    /// Run and clear every disposer. A failing disposer is logged and the rest
    /// still run. Returns the number of failures.
    pub fn run_all<F, E>(&mut self, mut invoke: F) -> usize
    where
        F: FnMut(D) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let disposers = std::mem::take(&mut self.disposers);
        let total = disposers.len();
        let mut failures = 0;
        for (index, disposer) in disposers.into_iter().enumerate() {
            if let Err(err) = invoke(disposer) {
                failures += 1;
                tracing::warn!(target = "oracle", index, total, error = %err, "cleanup disposer failed");
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_in_order_once_and_survives_failures() {
        let mut registry = CleanupRegistry::default();
        for n in 1..=3 {
            registry.register(n);
        }
        let mut seen = Vec::new();
        let failures = registry.run_all(|n| {
            seen.push(n);
            if n == 1 {
                Err("first disposer failed")
            } else {
                Ok(())
            }
        });
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(failures, 1);
        assert!(registry.is_empty());

        let again = registry.run_all(|_: i32| -> Result<(), &str> { panic!("already drained") });
        assert_eq!(again, 0);
    }

    #[test]
    fn crash_message_keeps_first_line_only() {
        let msg = crash_message("TypeError: cannot read property 'items' of undefined\n    at App");
        assert!(msg.starts_with(CRASH_HINT));
        assert!(msg.ends_with("(TypeError: cannot read property 'items' of undefined)"));
        assert_eq!(crash_message(""), CRASH_HINT);
    }
}
