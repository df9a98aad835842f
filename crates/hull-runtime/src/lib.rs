//! Container lifecycle management for the hull runtime.
//!
//! The [`engine::Engine`] sequences the pieces defined here and in the
//! lower crates: the [`workspace`] builds the container root, the
//! [`process`] launcher clones the isolated init, [`init`] runs inside it,
//! and [`state`] keeps one record per container on disk.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod exec;
pub mod image;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;
pub mod workspace;
