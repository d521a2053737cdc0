//! # syncstream-cli — SyncStream demo client
//!
//! Wires real collaborators around `syncstream-core`: a synthetic
//! display-capture device, the Gemini HTTP analyzer, TOML
//! configuration, and a scripted single-process demo that pairs a
//! sender and a receiver over the in-memory rendezvous.

pub mod capture;
pub mod config;
pub mod gemini;
