//! Scripted cache sessions replayed by `baff replay`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a replay script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Step {
    /// Attach a consumer to a store and remember it under `handle`.
    GetStore {
        handle: String,
        store_type: String,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        master: Option<String>,
        #[serde(default = "default_consumer")]
        consumer: String,
    },
    /// Load the first page of a store.
    Load { handle: String },
    /// Append the next page of a store.
    LoadNextPage { handle: String },
    /// Detach a consumer from a store.
    Detach {
        handle: String,
        #[serde(default = "default_consumer")]
        consumer: String,
    },
    /// Destroy a store regardless of consumers.
    Destroy { handle: String },
    /// Flush a store.
    Flush {
        handle: String,
        #[serde(default)]
        invalid: bool,
    },
    /// Resolve a master version.
    GetVersion { entity_type: String, entity_id: String },
    /// Invalidate after a master change.
    Refresh {
        entity_type: String,
        #[serde(default)]
        entity_id: Option<String>,
        #[serde(default)]
        master: Option<Value>,
    },
}

fn default_consumer() -> String {
    "replay".to_owned()
}

/// Read a script file holding a JSON array of steps.
pub fn load(path: &Path) -> Result<Vec<Step>> {
    let contents = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Result line printed after a step that produces one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// A store was attached.
    Store { handle: String, store_key: String },
    /// A store load completed.
    Loaded { store_key: String, records: usize },
    /// A store was destroyed.
    Destroyed { store_key: String, existed: bool },
    /// A master version was resolved.
    Version {
        entity_type: String,
        entity_id: String,
        version: Option<String>,
    },
    /// A step failed without aborting the session.
    Failed { op: &'static str, error: String },
}
