//! Support code for the `kb` command-line client: configuration, logging
//! setup, interrupt handling and local session persistence.
pub mod config;
pub mod interrupt;
pub mod logging;
pub mod persistence;
