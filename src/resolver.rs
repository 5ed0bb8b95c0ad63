//! Plugin Dependency Resolver
//!
//! Gates plugin operations against the catalog's requires/excludes lists and
//! the set of currently installed slugs.
//!
//! # Rules
//!
//! | Operation  | Installed state        | requires        | excludes          |
//! |------------|------------------------|-----------------|-------------------|
//! | Install    | must NOT be installed  | all installed   | none installed    |
//! | Uninstall  | must be installed      | all installed   | none installed    |
//! | Update     | must be installed      | all installed   | none installed    |
//!
//! The requires/excludes check is the same for all three operations, so an
//! uninstall can be blocked by a missing requirement. That is the observed
//! contract of the panel and is kept as-is.
//!
//! Checks run in this order and the first failure is reported: unknown slug,
//! installed state, requirements (list order), exclusions (list order).

use std::collections::HashSet;

use thiserror::Error;

use crate::catalog::{self, PluginDescriptor};
use crate::types::PluginOp;

/// Why a plugin operation was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Unknown plugin {slug}")]
    Unknown { slug: String },

    #[error("Plugin {slug} is already installed")]
    AlreadyInstalled { slug: String },

    #[error("Plugin {slug} is not installed")]
    NotInstalled { slug: String },

    #[error("Plugin {slug} requires plugin {requires}")]
    MissingRequirement { slug: String, requires: String },

    #[error("Plugin {slug} is incompatible with plugin {excludes}")]
    Excluded { slug: String, excludes: String },
}

/// Validate `op` on `slug` given the installed slugs.
///
/// Returns the catalog descriptor on success so the caller can build the task.
pub fn validate(
    op: PluginOp,
    slug: &str,
    installed: &HashSet<String>,
) -> Result<&'static PluginDescriptor, PluginError> {
    let plugin = catalog::lookup(slug).ok_or_else(|| PluginError::Unknown {
        slug: slug.to_string(),
    })?;

    let is_installed = installed.contains(plugin.slug);
    match op {
        PluginOp::Install if is_installed => {
            return Err(PluginError::AlreadyInstalled {
                slug: plugin.slug.to_string(),
            });
        }
        PluginOp::Uninstall | PluginOp::Update if !is_installed => {
            return Err(PluginError::NotInstalled {
                slug: plugin.slug.to_string(),
            });
        }
        _ => {}
    }

    check_dependencies(plugin, installed)?;
    Ok(plugin)
}

/// Requires/excludes check shared by every operation.
pub fn check_dependencies(
    plugin: &PluginDescriptor,
    installed: &HashSet<String>,
) -> Result<(), PluginError> {
    if let Some(missing) = plugin.requires.iter().find(|r| !installed.contains(**r)) {
        return Err(PluginError::MissingRequirement {
            slug: plugin.slug.to_string(),
            requires: missing.to_string(),
        });
    }

    if let Some(conflict) = plugin.excludes.iter().find(|e| installed.contains(**e)) {
        return Err(PluginError::Excluded {
            slug: plugin.slug.to_string(),
            excludes: conflict.to_string(),
        });
    }

    Ok(())
}
