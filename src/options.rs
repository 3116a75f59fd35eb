//! Build options
//!
//! Options controlling what the graph builder reports and checks. They can be loaded from
//! the same JSON documents as operation trees.

use serde::{Deserialize, Serialize};

/// Options for a single graph build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Emit an "unreachable code" warning for the first statement of every unreachable run
    pub report_unreachable: bool,
    /// Run the structural validator on the finished graph
    pub validate: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            report_unreachable: true,
            validate: true,
        }
    }
}

impl BuildOptions {
    /// Options with the unreachable-code warning turned off
    pub fn without_unreachable_warnings() -> Self {
        Self {
            report_unreachable: false,
            ..Self::default()
        }
    }
}
