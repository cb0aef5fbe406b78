//! Command-line interface definitions
//!
//! Arguments are grouped by the component that consumes them, like the
//! library's own [`VfsConfig`]. Each invocation opens one share and runs one
//! operation against it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use crate::config::VfsConfig;

/// Drive the SMB filesystem mediation layer against a local share root
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Share root every path is resolved against
    #[arg(long, short = 'r', value_name = "DIR")]
    pub root: PathBuf,

    /// Mediation layer options
    #[command(flatten)]
    pub vfs: VfsConfig,

    /// Output and logging configuration
    #[command(flatten)]
    pub output: OutputConfig,

    #[command(subcommand)]
    pub command: Command,
}

/// Output and logging configuration
///
/// Used by: `main()`, logging initialization
#[derive(clap::Args, Debug, Clone, Default)]
#[command(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl OutputConfig {
    /// Log level selected by `-q` / `-v` counts
    #[must_use]
    pub const fn level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// One operation per invocation; paths are share-relative
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show an entry's metadata without following a final symlink
    Stat { path: PathBuf },

    /// List a directory
    Ls {
        path: PathBuf,
        /// Include `.` and `..`
        #[arg(short, long)]
        all: bool,
    },

    /// Create a directory
    Mkdir {
        path: PathBuf,
        #[arg(long, short, default_value = "755", value_parser = parse_mode)]
        mode: u32,
    },

    /// Create an empty regular file
    Create {
        path: PathBuf,
        #[arg(long, short, default_value = "644", value_parser = parse_mode)]
        mode: u32,
    },

    /// Write a string into an existing file
    Write {
        path: PathBuf,
        data: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Flush the written range before returning
        #[arg(long)]
        sync: bool,
    },

    /// Print a file's contents
    Cat {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read (default: to end of file)
        #[arg(long)]
        length: Option<usize>,
    },

    /// Rename an entry
    Mv { from: PathBuf, to: PathBuf },

    /// Create a hard link
    Ln { existing: PathBuf, new: PathBuf },

    /// Create a symbolic link
    Symlink { target: PathBuf, link: PathBuf },

    /// Remove a file, symlink or empty directory
    Rm { path: PathBuf },

    /// Remove an empty directory
    Rmdir { path: PathBuf },

    /// Set a file's size
    Truncate { path: PathBuf, size: u64 },

    /// Change permission bits (octal)
    Chmod {
        #[arg(value_parser = parse_mode)]
        mode: u32,
        path: PathBuf,
    },

    /// Change owner and/or group
    Chown {
        path: PathBuf,
        #[arg(long)]
        uid: Option<u32>,
        #[arg(long)]
        gid: Option<u32>,
    },

    /// Print an extended attribute value
    Getxattr {
        path: PathBuf,
        name: String,
        /// Largest value accepted
        #[arg(long, default_value_t = 65_536)]
        max_len: usize,
    },

    /// Set an extended attribute
    Setxattr {
        path: PathBuf,
        name: String,
        value: String,
        /// Fail if the attribute exists
        #[arg(long, conflicts_with = "replace")]
        create: bool,
        /// Fail if the attribute does not exist
        #[arg(long)]
        replace: bool,
    },

    /// List extended attribute names
    Listxattr { path: PathBuf },
}

/// Parse an octal permission string such as `755` or `0o4750`
///
/// # Errors
///
/// Returns a message for non-octal input or bits outside `0o7777`.
pub fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {s:?}: {e}"))?;
    if mode > 0o7777 {
        return Err(format!("mode {s} has bits outside 7777"));
    }
    Ok(mode)
}

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The share root does not exist or is not a directory
    /// - Both --quiet and --verbose options are used
    /// - A mediation option is out of bounds
    pub fn validate(&self) -> Result<()> {
        if !self.root.is_dir() {
            anyhow::bail!("Share root is not a directory: {}", self.root.display());
        }

        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        self.vfs.validate()?;

        Ok(())
    }
}
