//! pinbuild-lib: staged build pipeline for a pinned native dependency.
//!
//! This crate provides the pieces the `pinbuild` CLI drives:
//! - `config`: the immutable pipeline configuration
//! - `fetch`: retrieving the pinned source archive
//! - `stage`: extracting the archive into the staged source tree
//! - `toolchain`: the compile / test / clean capabilities behind a trait
//! - `pipeline`: the filesystem-backed state machine tying the stages together
//! - `workspace_lock`: mutual exclusion between concurrent invocations

pub mod config;
pub mod consts;
pub mod fetch;
pub mod pipeline;
pub mod shell;
pub mod stage;
pub mod toolchain;
pub mod util;
pub mod workspace_lock;
