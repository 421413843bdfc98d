// SPDX-License-Identifier: MIT OR Apache-2.0
//! Processor settings, stored as RON.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// How the processor runs a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Format version
    pub version: u32,
    /// Contain a panicking node like one returning an error
    pub catch_panics: bool,
    /// Clear a node's messages before it is processed again
    pub clear_messages_each_pass: bool,
    /// Messages kept per node; the oldest are dropped
    pub max_messages_per_node: usize,
    /// Fail a node whose outputs name unknown ports or carry the wrong type
    pub validate_outputs: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            catch_panics: true,
            clear_messages_each_pass: true,
            max_messages_per_node: crate::graph::DEFAULT_MESSAGE_LIMIT,
            validate_outputs: true,
        }
    }
}

impl ProcessorSettings {
    /// Parse settings from RON
    pub fn from_ron(source: &str) -> std::io::Result<Self> {
        let settings: ProcessorSettings = ron::from_str(source).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        // Version check
        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Settings version {} is newer than supported version {}",
                    settings.version, SETTINGS_FORMAT_VERSION
                ),
            ));
        }

        Ok(settings)
    }

    /// Serialize settings to pretty RON
    pub fn to_ron(&self) -> std::io::Result<String> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);

        ron::ser::to_string_pretty(self, config).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_ron()?)
    }
}
