//! Layered variable store with precedence tiers.

use chrono::Utc;
use runlocal_core::context::VariableContext;
use std::collections::HashMap;
use std::sync::RwLock;

/// Where a variable value came from. Higher tiers win on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VariableSource {
    /// Computed from the current [`VariableContext`].
    Builtin,
    /// Loaded from a configuration file.
    Config,
    /// Loaded from the process environment.
    Environment,
    /// Supplied as command-line arguments.
    CommandLine,
}

impl VariableSource {
    /// All tiers, lowest precedence first.
    pub const ALL: [VariableSource; 4] = [
        VariableSource::Builtin,
        VariableSource::Config,
        VariableSource::Environment,
        VariableSource::CommandLine,
    ];

    fn index(self) -> usize {
        match self {
            VariableSource::Builtin => 0,
            VariableSource::Config => 1,
            VariableSource::Environment => 2,
            VariableSource::CommandLine => 3,
        }
    }
}

/// Key/value store with one map per precedence tier.
///
/// Writers for different configuration sources may run concurrently during
/// setup; each tier is guarded by its own lock. Once a run starts the store
/// is read-mostly, with builtins recomputed explicitly on context
/// transitions via [`VariableStore::update_context`].
#[derive(Debug, Default)]
pub struct VariableStore {
    tiers: [RwLock<HashMap<String, String>>; 4],
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value in one tier. Repeated sets at the same tier replace the
    /// prior value; lower tiers remain available as fallback.
    pub fn set(&self, source: VariableSource, name: impl Into<String>, value: impl Into<String>) {
        self.tiers[source.index()]
            .write()
            .expect("variable store lock poisoned")
            .insert(name.into(), value.into());
    }

    /// Set many values in one tier.
    pub fn set_many(&self, source: VariableSource, values: HashMap<String, String>) {
        self.tiers[source.index()]
            .write()
            .expect("variable store lock poisoned")
            .extend(values);
    }

    /// Resolve a name to the value from the highest tier that defines it.
    pub fn resolve(&self, name: &str) -> Option<String> {
        for tier in self.tiers.iter().rev() {
            let map = tier.read().expect("variable store lock poisoned");
            if let Some(value) = map.get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    /// Drop everything recorded for one tier.
    pub fn clear_source(&self, source: VariableSource) {
        self.tiers[source.index()]
            .write()
            .expect("variable store lock poisoned")
            .clear();
    }

    /// Copy the current process environment into the environment tier.
    pub fn load_environment(&self) {
        self.set_many(VariableSource::Environment, std::env::vars().collect());
    }

    /// Recompute the builtin tier for a new job/step scope.
    pub fn update_context(&self, ctx: &VariableContext) {
        let mut builtins = HashMap::new();
        builtins.insert(
            "RUNLOCAL_WORKSPACE".to_string(),
            ctx.workspace.to_string_lossy().into_owned(),
        );
        builtins.insert(
            "RUNLOCAL_BACKEND".to_string(),
            ctx.backend.as_str().to_string(),
        );
        builtins.insert(
            "RUNLOCAL_JOB".to_string(),
            ctx.job.clone().unwrap_or_default(),
        );
        builtins.insert(
            "RUNLOCAL_STEP".to_string(),
            ctx.step.clone().unwrap_or_default(),
        );
        builtins.insert(
            "RUNLOCAL_VERSION".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        builtins.insert("CI".to_string(), "true".to_string());

        let now = Utc::now();
        builtins.insert("RUNLOCAL_TIMESTAMP".to_string(), now.timestamp().to_string());
        builtins.insert(
            "RUNLOCAL_DATE".to_string(),
            now.format("%Y-%m-%d").to_string(),
        );

        if let Ok(home) = std::env::var("HOME") {
            builtins.insert("HOME".to_string(), home);
        }
        if let Ok(user) = std::env::var("USER") {
            builtins.insert("USER".to_string(), user);
        }
        if let Ok(pwd) = std::env::current_dir() {
            builtins.insert("PWD".to_string(), pwd.to_string_lossy().into_owned());
        }

        let mut tier = self.tiers[VariableSource::Builtin.index()]
            .write()
            .expect("variable store lock poisoned");
        tier.clear();
        tier.extend(builtins);
    }

    /// Snapshot of one tier.
    pub fn tier_snapshot(&self, source: VariableSource) -> HashMap<String, String> {
        self.tiers[source.index()]
            .read()
            .expect("variable store lock poisoned")
            .clone()
    }

    /// Merged snapshot honoring precedence, lowest tier first.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let mut merged = HashMap::new();
        for source in VariableSource::ALL {
            merged.extend(self.tier_snapshot(source));
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlocal_core::context::BackendKind;

    #[test]
    fn test_higher_tier_wins() {
        let store = VariableStore::new();
        store.set(VariableSource::Config, "NAME", "from-config");
        store.set(VariableSource::Environment, "NAME", "from-env");
        store.set(VariableSource::CommandLine, "NAME", "from-cli");
        assert_eq!(store.resolve("NAME").as_deref(), Some("from-cli"));
    }

    #[test]
    fn test_clearing_tier_reveals_fallback() {
        let store = VariableStore::new();
        store.set(VariableSource::Config, "NAME", "from-config");
        store.set(VariableSource::CommandLine, "NAME", "from-cli");
        store.clear_source(VariableSource::CommandLine);
        assert_eq!(store.resolve("NAME").as_deref(), Some("from-config"));
    }

    #[test]
    fn test_same_tier_replaces() {
        let store = VariableStore::new();
        store.set(VariableSource::Config, "NAME", "first");
        store.set(VariableSource::Config, "NAME", "second");
        assert_eq!(store.resolve("NAME").as_deref(), Some("second"));
    }

    #[test]
    fn test_unknown_name_is_none() {
        let store = VariableStore::new();
        assert_eq!(store.resolve("NOPE"), None);
    }

    #[test]
    fn test_update_context_builtins() {
        let store = VariableStore::new();
        let ctx = VariableContext::new("/tmp/ws", BackendKind::Host).for_job("build");
        store.update_context(&ctx);

        assert_eq!(store.resolve("RUNLOCAL_WORKSPACE").as_deref(), Some("/tmp/ws"));
        assert_eq!(store.resolve("RUNLOCAL_BACKEND").as_deref(), Some("host"));
        assert_eq!(store.resolve("RUNLOCAL_JOB").as_deref(), Some("build"));
        assert_eq!(store.resolve("RUNLOCAL_STEP").as_deref(), Some(""));
        assert_eq!(
            store.resolve("RUNLOCAL_VERSION").as_deref(),
            Some(env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_update_context_replaces_previous_scope() {
        let store = VariableStore::new();
        let root = VariableContext::new("/tmp/ws", BackendKind::Container);
        store.update_context(&root.for_job("build").for_step("compile"));
        assert_eq!(store.resolve("RUNLOCAL_STEP").as_deref(), Some("compile"));

        store.update_context(&root.for_job("test"));
        assert_eq!(store.resolve("RUNLOCAL_JOB").as_deref(), Some("test"));
        assert_eq!(store.resolve("RUNLOCAL_STEP").as_deref(), Some(""));
    }

    #[test]
    fn test_builtin_loses_to_every_other_tier() {
        let store = VariableStore::new();
        let ctx = VariableContext::new("/tmp/ws", BackendKind::Host);
        store.update_context(&ctx);
        store.set(VariableSource::Config, "RUNLOCAL_BACKEND", "overridden");
        assert_eq!(store.resolve("RUNLOCAL_BACKEND").as_deref(), Some("overridden"));
    }

    #[test]
    fn test_concurrent_writers() {
        use std::sync::Arc;
        let store = Arc::new(VariableStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.set(VariableSource::Config, format!("K{}_{}", i, j), "v");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.tier_snapshot(VariableSource::Config).len(), 400);
    }
}
