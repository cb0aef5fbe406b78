//! Mediation layer configuration
//!
//! [`VfsConfig`] is a `clap` argument group so a server binary can flatten it
//! into its own command line; library users build it with `Default`.

use anyhow::Result;

/// Largest name list `list_xattrs` returns (the kernel's `XATTR_LIST_MAX`)
pub const DEFAULT_XATTR_LIST_MAX: usize = 65_536;

/// Symlinks followed during one resolution before giving up with `ELOOP`
pub const DEFAULT_MAX_SYMLINK_DEPTH: usize = 40;

/// Mediation layer options
///
/// Used by: `Vfs::builder()`, the data path and the resolver
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
#[command(next_help_heading = "Filesystem Mediation Options")]
pub struct VfsConfig {
    /// Skip oplock breaks before writes and handle truncation
    ///
    /// Truncation by handle then checks byte-range locks explicitly instead.
    #[arg(long)]
    pub disable_oplocks: bool,

    /// Maximum size in bytes of an extended attribute name list
    #[arg(long, default_value_t = DEFAULT_XATTR_LIST_MAX)]
    pub xattr_list_max: usize,

    /// Maximum symlinks followed while resolving one path
    #[arg(long, default_value_t = DEFAULT_MAX_SYMLINK_DEPTH)]
    pub max_symlink_depth: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            disable_oplocks: false,
            xattr_list_max: DEFAULT_XATTR_LIST_MAX,
            max_symlink_depth: DEFAULT_MAX_SYMLINK_DEPTH,
        }
    }
}

impl VfsConfig {
    /// Whether writes break read-caching oplocks first
    #[must_use]
    pub const fn oplocks_enabled(&self) -> bool {
        !self.disable_oplocks
    }

    /// Validate option bounds
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - `xattr_list_max` is zero
    /// - `max_symlink_depth` is zero
    pub fn validate(&self) -> Result<()> {
        if self.xattr_list_max == 0 {
            anyhow::bail!("xattr list maximum must be greater than 0");
        }
        if self.max_symlink_depth == 0 {
            anyhow::bail!("symlink depth limit must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = VfsConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.oplocks_enabled());
        assert_eq!(config.xattr_list_max, 65_536);
    }

    #[test]
    fn test_rejects_zero_limits() {
        let config = VfsConfig {
            xattr_list_max: 0,
            ..VfsConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("xattr list maximum"));

        let config = VfsConfig {
            max_symlink_depth: 0,
            ..VfsConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
