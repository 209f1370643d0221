//! vdd-switcher library
//!
//! Keeps a Parsec virtual display alive for the length of a streaming session
//! and tears it down when the control client asks for it.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial library structure

pub mod client;
pub mod config;
pub mod daemon;
pub mod display;
pub mod driver;
