//! ---
//! vms_section: "01-core-functionality"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Shared primitives and utilities for the bus runtime."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use serde::Serialize;

/// Build metadata reported by `--version` and status dumps.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub package: &'static str,
    pub semver: &'static str,
    pub profile: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            package: env!("CARGO_PKG_NAME"),
            semver: env!("CARGO_PKG_VERSION"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }

    /// Single line summary, e.g. `vms-common 0.1.0 (debug)`.
    pub fn extended(&self) -> String {
        format!("{} {} ({})", self.package, self.semver, self.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        assert!(info.extended().contains(info.semver));
    }
}
