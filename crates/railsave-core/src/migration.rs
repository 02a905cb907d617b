//! Post-load structural migrations.
//!
//! Some concepts of old files no longer exist in the current object model.
//! Rather than teaching every chunk loader about them, a loaded world is
//! repaired afterwards by a list of named one-shot steps. Each step decides
//! from the file's [`FormatVersion`] whether it applies, and runs at most
//! once per load, in registration order.

use tracing::info;

use crate::version::FormatVersion;

/// Errors that can occur during migration.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {reason}")]
    MigrationFailed { name: &'static str, reason: String },
    #[error("migration '{name}' lost object {index}")]
    MissingObject { name: &'static str, index: u32 },
}

impl MigrationError {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationError::MigrationFailed { name, .. } | MigrationError::MissingObject { name, .. } => *name,
        }
    }
}

/// A function that rewrites a loaded world. Returns how many objects it
/// changed.
pub type MigrationFn<W> = fn(&mut W, &FormatVersion) -> Result<usize, MigrationError>;

/// One registered migration.
pub struct MigrationStep<W> {
    pub name: &'static str,
    pub applies: fn(&FormatVersion) -> bool,
    pub apply: MigrationFn<W>,
}

/// Ordered registry of migrations for worlds of type `W`.
pub struct MigrationRegistry<W> {
    steps: Vec<MigrationStep<W>>,
}

impl<W> MigrationRegistry<W> {
    /// Create an empty migration registry.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a step. Steps run in the order they were registered.
    pub fn register(&mut self, name: &'static str, applies: fn(&FormatVersion) -> bool, apply: MigrationFn<W>) {
        self.steps.push(MigrationStep { name, applies, apply });
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: &'static str, applies: fn(&FormatVersion) -> bool, apply: MigrationFn<W>) -> Self {
        self.register(name, applies, apply);
        self
    }

    /// Number of registered migration steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Names of the steps that would run for a file of format `fv`.
    pub fn pending(&self, fv: &FormatVersion) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| (s.applies)(fv))
            .map(|s| s.name)
            .collect()
    }

    /// Run every applicable step once. Returns `(name, changed)` per step run.
    pub fn run(&self, world: &mut W, fv: &FormatVersion) -> Result<Vec<(&'static str, usize)>, MigrationError> {
        let mut report = Vec::new();
        for step in self.steps.iter().filter(|s| (s.applies)(fv)) {
            let changed = (step.apply)(world, fv)?;
            info!(migration = step.name, changed, version = %fv, "migration applied");
            report.push((step.name, changed));
        }
        Ok(report)
    }
}

impl<W> Default for MigrationRegistry<W> {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Log {
        entries: Vec<&'static str>,
    }

    fn before_100(fv: &FormatVersion) -> bool {
        fv.is_legacy_before(100, 0)
    }

    fn always(_: &FormatVersion) -> bool {
        true
    }

    fn push_a(log: &mut Log, _: &FormatVersion) -> Result<usize, MigrationError> {
        log.entries.push("a");
        Ok(1)
    }

    fn push_b(log: &mut Log, _: &FormatVersion) -> Result<usize, MigrationError> {
        log.entries.push("b");
        Ok(2)
    }

    fn failing(_: &mut Log, _: &FormatVersion) -> Result<usize, MigrationError> {
        Err(MigrationError::MigrationFailed {
            name: "failing",
            reason: "test failure".into(),
        })
    }

    #[test]
    fn registry_new_is_empty() {
        let reg: MigrationRegistry<Log> = MigrationRegistry::new();
        assert_eq!(reg.step_count(), 0);
        assert!(reg.pending(&FormatVersion::CURRENT).is_empty());
    }

    #[test]
    fn steps_run_in_registration_order() {
        let reg = MigrationRegistry::new()
            .with("b", always, push_b)
            .with("a", always, push_a);
        let mut log = Log::default();
        let report = reg.run(&mut log, &FormatVersion::CURRENT).unwrap();
        assert_eq!(log.entries, vec!["b", "a"]);
        assert_eq!(report, vec![("b", 2), ("a", 1)]);
    }

    #[test]
    fn inapplicable_steps_are_skipped() {
        let reg = MigrationRegistry::new()
            .with("old", before_100, push_a)
            .with("all", always, push_b);

        let old = FormatVersion::Legacy { major: 99, minor: 0 };
        assert_eq!(reg.pending(&old), vec!["old", "all"]);
        assert_eq!(reg.pending(&FormatVersion::CURRENT), vec!["all"]);

        let mut log = Log::default();
        reg.run(&mut log, &FormatVersion::CURRENT).unwrap();
        assert_eq!(log.entries, vec!["b"]);
    }

    #[test]
    fn failure_stops_the_run() {
        let reg = MigrationRegistry::new()
            .with("failing", always, failing)
            .with("a", always, push_a);
        let mut log = Log::default();
        let err = reg.run(&mut log, &FormatVersion::CURRENT).unwrap_err();
        assert_eq!(err.name(), "failing");
        assert!(log.entries.is_empty());
    }
}
