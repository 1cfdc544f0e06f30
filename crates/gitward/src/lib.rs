//! Gitward - access-controlled git hosting over ssh
//!
//! Every ssh login runs one command on behalf of an authenticated
//! identity. Gitward decides whether that identity may run it against the
//! requested repository and rewrites the command to the repository's real
//! location.
//!
//! # Example
//!
//! ```rust
//! use gitward::{Config, Denial, FilesystemHooks, Gate};
//!
//! let config = Config::parse(
//!     "[gitosis]\n\
//!      repositories = /srv/git\n\
//!      \n\
//!      [group devs]\n\
//!      members = jdoe\n\
//!      readonly = docs\n",
//! )?;
//!
//! let hooks = FilesystemHooks::new("/home/git");
//! let gate = Gate::new(&config, "/home/git", &hooks);
//!
//! assert_eq!(
//!     gate.serve("jdoe", "git-receive-pack 'docs'"),
//!     Err(Denial::WriteAccessDenied)
//! );
//! assert_eq!(
//!     gate.serve("jdoe", "rm -rf '/'"),
//!     Err(Denial::UnknownCommand)
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Modules
//!
//! - [`config`]: ordered INI store with typed section names
//! - [`group`]: group membership closure and member listing
//! - [`access`]: per-path access resolution and the batch access table
//! - [`serve`]: the command gate
//! - [`repository`]: repository creation and regeneration hooks
//! - [`daemon`], [`gitweb`], [`htaccess`]: generated files for git-daemon,
//!   gitweb and Apache

pub mod access;
pub mod config;
pub mod daemon;
mod error;
mod files;
pub mod gitweb;
pub mod group;
pub mod htaccess;
pub mod logging;
pub mod repository;
pub mod serve;

pub use access::{AccessTable, AllAccess, Grant, Mode};
pub use config::{Config, SectionKind};
pub use error::{Error, Result};
pub use repository::{FilesystemHooks, RepositoryHooks};
pub use serve::{CvsEnvironment, Denial, Gate, Served};
