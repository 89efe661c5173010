pub mod config;
pub mod crypto;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod guard;
pub mod registry;
pub mod service;
pub mod sync;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
