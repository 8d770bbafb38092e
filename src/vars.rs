use std::collections::HashMap;

/// Read access to environment variables.
///
/// Everything that consults the process environment takes one of these,
/// so that a run can be resolved against a fixed snapshot.
pub trait VarSource {
    fn var(&self, key: &str) -> Option<String>;

    /// Like [`VarSource::var`], but treats empty values as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|value| !value.is_empty())
    }

    fn var_or(&self, key: &str, default: &str) -> String {
        self.var(key).unwrap_or_else(|| default.to_string())
    }
}

/// The environment of the running process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl VarSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}
