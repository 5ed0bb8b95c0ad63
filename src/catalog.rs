//! Plugin catalog
//!
//! The set of installable plugins is closed: one [`Plugin`] variant per
//! known component, each mapped to a static [`PluginDescriptor`] carrying its
//! command templates and dependency lists as plain data.
//!
//! # Dependency rules
//!
//! | Plugin              | Requires    | Excludes                  |
//! |---------------------|-------------|---------------------------|
//! | MySQL 5.7/8.0/8.4   | -           | the other MySQL versions  |
//! | PostgreSQL 15/16    | -           | the other PostgreSQL      |
//! | PHP 7.4 - 8.3       | openresty   | -                         |
//! | phpMyAdmin          | openresty   | -                         |

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Known plugins, keyed by slug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plugin {
    #[strum(serialize = "openresty")]
    OpenResty,
    #[strum(serialize = "mysql57")]
    Mysql57,
    #[strum(serialize = "mysql80")]
    Mysql80,
    #[strum(serialize = "mysql84")]
    Mysql84,
    #[strum(serialize = "postgresql15")]
    Postgresql15,
    #[strum(serialize = "postgresql16")]
    Postgresql16,
    #[strum(serialize = "php74")]
    Php74,
    #[strum(serialize = "php80")]
    Php80,
    #[strum(serialize = "php81")]
    Php81,
    #[strum(serialize = "php82")]
    Php82,
    #[strum(serialize = "php83")]
    Php83,
    #[strum(serialize = "phpmyadmin")]
    PhpMyAdmin,
    #[strum(serialize = "pureftpd")]
    PureFtpd,
    Redis,
    S3fs,
    Rsync,
    Supervisor,
    Fail2ban,
    Toolbox,
}

/// Static description of a catalog plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub plugin: Plugin,
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub install: &'static str,
    pub uninstall: &'static str,
    pub update: &'static str,
    /// Slugs that must already be installed
    pub requires: &'static [&'static str],
    /// Slugs that must not be installed
    pub excludes: &'static [&'static str],
}

impl PluginDescriptor {
    /// Command template for `op`
    pub fn command(&self, op: crate::types::PluginOp) -> &'static str {
        use crate::types::PluginOp;
        match op {
            PluginOp::Install => self.install,
            PluginOp::Uninstall => self.uninstall,
            PluginOp::Update => self.update,
        }
    }
}

macro_rules! scripts {
    ($dir:literal) => {
        (
            concat!("bash /www/panel/scripts/", $dir, "/install.sh"),
            concat!("bash /www/panel/scripts/", $dir, "/uninstall.sh"),
            concat!("bash /www/panel/scripts/", $dir, "/update.sh"),
        )
    };
    ($dir:literal, $version:literal) => {
        (
            concat!("bash /www/panel/scripts/", $dir, "/install.sh ", $version),
            concat!("bash /www/panel/scripts/", $dir, "/uninstall.sh ", $version),
            concat!("bash /www/panel/scripts/", $dir, "/update.sh ", $version),
        )
    };
}

const fn descriptor(
    plugin: Plugin,
    slug: &'static str,
    name: &'static str,
    description: &'static str,
    commands: (&'static str, &'static str, &'static str),
    requires: &'static [&'static str],
    excludes: &'static [&'static str],
) -> PluginDescriptor {
    PluginDescriptor {
        plugin,
        slug,
        name,
        description,
        install: commands.0,
        uninstall: commands.1,
        update: commands.2,
        requires,
        excludes,
    }
}

const NONE: &[&str] = &[];
const NEEDS_WEB_SERVER: &[&str] = &["openresty"];

static CATALOG: &[PluginDescriptor] = &[
    descriptor(Plugin::OpenResty, "openresty", "OpenResty", "Nginx-based web platform", scripts!("openresty"), NONE, NONE),
    descriptor(Plugin::Mysql57, "mysql57", "MySQL-5.7", "MySQL 5.7 database server", scripts!("mysql", "57"), NONE, &["mysql80", "mysql84"]),
    descriptor(Plugin::Mysql80, "mysql80", "MySQL-8.0", "MySQL 8.0 database server", scripts!("mysql", "80"), NONE, &["mysql57", "mysql84"]),
    descriptor(Plugin::Mysql84, "mysql84", "MySQL-8.4", "MySQL 8.4 database server", scripts!("mysql", "84"), NONE, &["mysql57", "mysql80"]),
    descriptor(Plugin::Postgresql15, "postgresql15", "PostgreSQL-15", "PostgreSQL 15 database server", scripts!("postgresql", "15"), NONE, &["postgresql16"]),
    descriptor(Plugin::Postgresql16, "postgresql16", "PostgreSQL-16", "PostgreSQL 16 database server", scripts!("postgresql", "16"), NONE, &["postgresql15"]),
    descriptor(Plugin::Php74, "php74", "PHP-7.4", "PHP 7.4 FastCGI runtime", scripts!("php", "74"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::Php80, "php80", "PHP-8.0", "PHP 8.0 FastCGI runtime", scripts!("php", "80"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::Php81, "php81", "PHP-8.1", "PHP 8.1 FastCGI runtime", scripts!("php", "81"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::Php82, "php82", "PHP-8.2", "PHP 8.2 FastCGI runtime", scripts!("php", "82"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::Php83, "php83", "PHP-8.3", "PHP 8.3 FastCGI runtime", scripts!("php", "83"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::PhpMyAdmin, "phpmyadmin", "phpMyAdmin", "Web UI for MySQL", scripts!("phpmyadmin"), NEEDS_WEB_SERVER, NONE),
    descriptor(Plugin::PureFtpd, "pureftpd", "Pure-FTPd", "FTP server", scripts!("pureftpd"), NONE, NONE),
    descriptor(Plugin::Redis, "redis", "Redis", "In-memory key-value store", scripts!("redis"), NONE, NONE),
    descriptor(Plugin::S3fs, "s3fs", "S3fs", "Mount S3 buckets as filesystems", scripts!("s3fs"), NONE, NONE),
    descriptor(Plugin::Rsync, "rsync", "Rsync", "File synchronisation daemon", scripts!("rsync"), NONE, NONE),
    descriptor(Plugin::Supervisor, "supervisor", "Supervisor", "Process supervisor", scripts!("supervisor"), NONE, NONE),
    descriptor(Plugin::Fail2ban, "fail2ban", "Fail2ban", "Brute-force protection", scripts!("fail2ban"), NONE, NONE),
    descriptor(Plugin::Toolbox, "toolbox", "Toolbox", "System maintenance helpers", scripts!("toolbox"), NONE, NONE),
];

impl Plugin {
    /// Static descriptor for this plugin
    pub fn descriptor(self) -> &'static PluginDescriptor {
        // CATALOG is declared in enum order
        &CATALOG[self as usize]
    }
}

/// All catalog entries in declaration order
pub fn all() -> &'static [PluginDescriptor] {
    CATALOG
}

/// Descriptor for `slug`; `None` means the caller asked for an unknown plugin.
pub fn lookup(slug: &str) -> Option<&'static PluginDescriptor> {
    slug.parse::<Plugin>().ok().map(Plugin::descriptor)
}

/// Slugs of every catalog plugin
pub fn slugs() -> impl Iterator<Item = &'static str> {
    Plugin::iter().map(|p| p.descriptor().slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PluginOp;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_matches_enum_order() {
        for plugin in Plugin::iter() {
            let desc = plugin.descriptor();
            assert_eq!(desc.plugin, plugin);
            assert_eq!(desc.slug, plugin.to_string());
        }
        assert_eq!(CATALOG.len(), Plugin::iter().count());
    }

    #[test]
    fn test_lookup_known_and_unknown() {
        assert_eq!(lookup("redis").unwrap().name, "Redis");
        assert_eq!(lookup("phpmyadmin").unwrap().plugin, Plugin::PhpMyAdmin);
        assert!(lookup("nginx").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_dependency_slugs_exist() {
        let known: HashSet<&str> = slugs().collect();
        for desc in all() {
            for slug in desc.requires.iter().chain(desc.excludes) {
                assert!(known.contains(slug), "{} references {}", desc.slug, slug);
            }
            assert!(!desc.requires.contains(&desc.slug));
            assert!(!desc.excludes.contains(&desc.slug));
        }
    }

    #[test]
    fn test_exclusions_are_symmetric() {
        for desc in all() {
            for other in desc.excludes {
                let other = lookup(other).unwrap();
                assert!(
                    other.excludes.contains(&desc.slug),
                    "{} excludes {} but not vice versa",
                    desc.slug,
                    other.slug
                );
            }
        }
    }

    #[test]
    fn test_versioned_commands() {
        let mysql = lookup("mysql80").unwrap();
        assert_eq!(
            mysql.command(PluginOp::Install),
            "bash /www/panel/scripts/mysql/install.sh 80"
        );
        assert_eq!(
            lookup("redis").unwrap().command(PluginOp::Uninstall),
            "bash /www/panel/scripts/redis/uninstall.sh"
        );
    }
}
