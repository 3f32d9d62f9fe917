use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::{CString, OsStr};

/// Variables handed to every external command.
///
/// Captured once from the process environment at start-up. The shell reads `PATH` and
/// `HOME` from here and passes the whole set to children through `execve`, so lookups
/// can be tested without touching the real process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment. Variables that are not valid UTF-8
    /// are left out.
    pub fn new() -> Self {
        let vars = stdenv::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The command search path, if `PATH` is set.
    pub fn search_path(&self) -> Option<&OsStr> {
        self.get_var("PATH").map(OsStr::new)
    }

    /// `KEY=value` strings for `execve`. Entries containing a NUL byte are skipped.
    pub fn to_envp(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::default();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE"));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.search_path().is_some());
    }

    #[test]
    fn test_envp_entries() {
        let mut env = Environment::default();
        env.set_var("A", "1");
        env.set_var("BAD", "nul\0byte");
        let envp = env.to_envp();
        assert_eq!(envp.len(), 1);
        assert_eq!(envp[0].to_str().unwrap(), "A=1");
    }
}
