// Distribution descriptor
// Installable identity of the package and the runtime dependencies its components need

use crate::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Cargo manifest this crate was built from
const MANIFEST: &str = include_str!("../Cargo.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyRole {
    /// RPC transport hosting the WAMP router
    RpcFramework,
    AsyncRuntime,
    Serialization,
    ServiceDiscovery,
    /// Display-server automation binding
    DisplayServer,
    SystemBus,
}

impl DependencyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyRole::RpcFramework => "rpc-framework",
            DependencyRole::AsyncRuntime => "async-runtime",
            DependencyRole::Serialization => "serialization",
            DependencyRole::ServiceDiscovery => "service-discovery",
            DependencyRole::DisplayServer => "display-server",
            DependencyRole::SystemBus => "system-bus",
        }
    }
}

impl fmt::Display for DependencyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub role: DependencyRole,
    pub crate_name: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Distribution {
    pub name: &'static str,
    pub version: &'static str,
    pub author: &'static str,
    pub license: &'static str,
    pub description: &'static str,
    pub repository: &'static str,
    pub download_url: &'static str,
    pub keywords: &'static [&'static str],
    pub requires: &'static [Requirement],
}

pub const DISTRIBUTION: Distribution = Distribution {
    name: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    author: env!("CARGO_PKG_AUTHORS"),
    license: env!("CARGO_PKG_LICENSE"),
    description: env!("CARGO_PKG_DESCRIPTION"),
    repository: env!("CARGO_PKG_REPOSITORY"),
    download_url: concat!(
        env!("CARGO_PKG_REPOSITORY"),
        "/tarball/",
        env!("CARGO_PKG_VERSION")
    ),
    keywords: &["linux", "ubuntu"],
    requires: &[
        Requirement {
            role: DependencyRole::RpcFramework,
            crate_name: "axum",
        },
        Requirement {
            role: DependencyRole::AsyncRuntime,
            crate_name: "tokio",
        },
        Requirement {
            role: DependencyRole::Serialization,
            crate_name: "serde_json",
        },
        Requirement {
            role: DependencyRole::ServiceDiscovery,
            crate_name: "mdns-sd",
        },
        Requirement {
            role: DependencyRole::DisplayServer,
            crate_name: "x11rb",
        },
        Requirement {
            role: DependencyRole::SystemBus,
            crate_name: "zbus",
        },
    ],
};

impl Distribution {
    /// Check that every declared requirement is present in a Cargo manifest
    pub fn verify_manifest(&self, manifest: &str) -> Result<()> {
        let parsed: toml::Table = toml::from_str(manifest)
            .map_err(|e| Error::ConfigSyntax(format!("Failed to parse manifest: {}", e)))?;

        let dependencies = parsed.get("dependencies").and_then(|d| d.as_table());

        for requirement in self.requires {
            let declared = dependencies
                .map(|deps| deps.contains_key(requirement.crate_name))
                .unwrap_or(false);

            if !declared {
                return Err(Error::MissingDependency {
                    role: requirement.role.to_string(),
                    crate_name: requirement.crate_name.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Verify against the manifest embedded at build time
    pub fn verify(&self) -> Result<()> {
        self.verify_manifest(MANIFEST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_version() {
        assert_eq!(DISTRIBUTION.name, "screen-brightness-server");
        assert_eq!(DISTRIBUTION.version, "0.1.0");
        assert!(!DISTRIBUTION.author.is_empty());
        assert!(!DISTRIBUTION.license.is_empty());
    }

    #[test]
    fn test_download_url() {
        assert!(DISTRIBUTION.download_url.ends_with("/tarball/0.1.0"));
        assert!(DISTRIBUTION
            .download_url
            .starts_with(DISTRIBUTION.repository));
    }

    #[test]
    fn test_keywords_match_manifest() {
        let parsed: toml::Table = toml::from_str(MANIFEST).unwrap();
        let keywords: Vec<&str> = parsed["package"]["keywords"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|k| k.as_str())
            .collect();
        assert_eq!(keywords, DISTRIBUTION.keywords);
    }

    #[test]
    fn test_own_manifest_satisfies_requirements() {
        assert!(DISTRIBUTION.verify().is_ok());
    }

    #[test]
    fn test_missing_dependency_fails() {
        for requirement in DISTRIBUTION.requires {
            let stripped: String = MANIFEST
                .lines()
                .filter(|line| !line.starts_with(&format!("{} =", requirement.crate_name)))
                .collect::<Vec<_>>()
                .join("\n");

            match DISTRIBUTION.verify_manifest(&stripped) {
                Err(Error::MissingDependency { crate_name, .. }) => {
                    assert_eq!(crate_name, requirement.crate_name)
                }
                other => panic!("expected MissingDependency, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_roles_are_distinct() {
        let mut roles: Vec<_> = DISTRIBUTION.requires.iter().map(|r| r.role.as_str()).collect();
        roles.sort();
        roles.dedup();
        assert_eq!(roles.len(), DISTRIBUTION.requires.len());
    }

    #[test]
    fn test_unparseable_manifest() {
        let err = DISTRIBUTION.verify_manifest("[package").unwrap_err();
        assert!(err.is_config_error());
    }
}
