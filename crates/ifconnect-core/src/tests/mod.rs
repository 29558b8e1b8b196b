//! Test module for ifconnect-core
//!
//! This module contains tests for:
//! - Configuration loading, defaults and interval resolution
//! - Client facade and session lifecycle against a loopback mock host

mod client_tests;
