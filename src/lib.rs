//! uos-linker: binds Discord identities to Ultra blockchain accounts and keeps
//! guild roles consistent with on-chain holdings.

pub mod bootstrap;
pub mod chain;
pub mod commands;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod linking;
pub mod platform;
pub mod roles;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
