//! End-to-end tests driving the `pinbuild` binary against local archives.
//!
//! The configured toolchain commands are `sh` one-liners, so these only run on unix.

#![cfg(unix)]

mod common;

mod build_tests;
mod clean_tests;
mod fetch_tests;
mod test_tests;
