//! # gitdir
//!
//! A self-hosted git SSH server whose entire configuration lives in git
//! repositories served by the server itself. Users, groups, orgs, repo
//! ACLs, and runtime options are read from `config.yml` in the admin repo;
//! pushing to that repo (or to a per-user / per-org config repo) is how the
//! server is reconfigured, with an update hook validating every candidate
//! config before the push is accepted.
//!
//! The crate is organized around an immutable [`admin::Config`] snapshot:
//! sessions authenticate, resolve repo paths, and evaluate permissions
//! against the snapshot they entered with, while reloads publish a fresh
//! snapshot atomically.

pub mod admin;
pub mod config;
pub mod error;
pub mod hook;
pub mod server;
pub mod store;
pub mod types;
