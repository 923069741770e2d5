use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Interpreter settings, fixed for the lifetime of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Diagnostic name used for chunks the host evaluates in the guest.
    pub script_name: String,

    /// Extra directories appended to the guest module search path.
    pub module_paths: Vec<PathBuf>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            script_name: "rackua".into(),
            module_paths: Vec::new(),
        }
    }
}
