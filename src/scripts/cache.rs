//! Script cache with digest-first execution.

use super::{digest, ScriptName, ScriptSource};
use crate::backend::{Backend, Reply};
use crate::error::Result;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, OnceLock};

/// A store-side script: its source and lazily computed digest.
pub struct Script {
    name: ScriptName,
    source: String,
    hash: OnceLock<String>,
}

impl Script {
    /// Create a script from its source. The hash is computed on first use.
    pub fn new(name: ScriptName, source: impl Into<String>) -> Self {
        Self {
            name,
            source: source.into(),
            hash: OnceLock::new(),
        }
    }

    /// Get the script name.
    pub fn name(&self) -> ScriptName {
        self.name
    }

    /// Get the script source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Digest of the source, computed once.
    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| digest(&self.source))
    }

    /// Execute on the store.
    ///
    /// Tries the digest reference first. If the store does not know the
    /// script, resends the full source, which also registers it under the
    /// digest. Any other failure is returned unchanged.
    pub fn eval(&self, backend: &dyn Backend, args: &[Vec<u8>]) -> Result<Reply> {
        match backend.eval_sha(self.hash(), args) {
            Err(e) if e.is_no_script() => {
                tracing::debug!(script = %self.name, hash = self.hash(), "script unknown to store, sending source");
                backend.eval(&self.source, args)
            }
            result => result,
        }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name)
            .field("hash", &self.hash.get())
            .finish()
    }
}

/// Scripts loaded so far, by name.
///
/// Each script is loaded at most once per cache and shared afterwards. The
/// cache has no lock of its own; the client keeps it behind its state lock
/// and evaluates the returned [`Script`] after releasing it.
#[derive(Debug, Default)]
pub struct ScriptCache {
    source: ScriptSource,
    scripts: HashMap<ScriptName, Arc<Script>>,
}

impl ScriptCache {
    /// Create an empty cache loading sources from `source`.
    pub fn new(source: ScriptSource) -> Self {
        Self {
            source,
            scripts: HashMap::new(),
        }
    }

    /// Get a script, loading its source on first use.
    pub fn script(&mut self, name: ScriptName) -> Result<Arc<Script>> {
        if let Some(script) = self.scripts.get(&name) {
            return Ok(Arc::clone(script));
        }

        let source = match &self.source {
            ScriptSource::Bundled => name.bundled_source().to_string(),
            ScriptSource::Directory(dir) => fs::read_to_string(dir.join(name.file_name()))?,
        };
        let script = Arc::new(Script::new(name, source));
        tracing::debug!(script = %name, "loaded script");

        self.scripts.insert(name, Arc::clone(&script));
        Ok(script)
    }

    /// Number of scripts loaded.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no script has been loaded yet.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
