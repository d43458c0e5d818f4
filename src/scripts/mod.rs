//! Store-side scripts and the client-side script cache.
//!
//! Publish and consume run as atomic scripts on the store. The client keeps
//! each script's source and digest, calls it by digest, and resends the
//! full source only when the store reports it does not know the digest.

mod cache;

pub use cache::{Script, ScriptCache};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::PathBuf;

/// Scripts the client executes on the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptName {
    Publish,
    Consume,
}

impl ScriptName {
    /// Name used for logging and file lookup.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptName::Publish => "publish",
            ScriptName::Consume => "consume",
        }
    }

    /// File name inside a script directory.
    pub fn file_name(&self) -> String {
        format!("{}.lua", self.as_str())
    }

    /// Source compiled into the crate.
    pub fn bundled_source(&self) -> &'static str {
        match self {
            ScriptName::Publish => include_str!("../../scripts/publish.lua"),
            ScriptName::Consume => include_str!("../../scripts/consume.lua"),
        }
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where script sources are loaded from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptSource {
    /// Sources compiled into the crate from `scripts/`.
    #[default]
    Bundled,
    /// `<dir>/<name>.lua`, read on first use.
    Directory(PathBuf),
}

/// SHA-1 hex digest the store uses to reference a script.
pub fn digest(source: &str) -> String {
    hex::encode(Sha1::digest(source.as_bytes()))
}
