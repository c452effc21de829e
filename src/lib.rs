//! xcast - Headless application streaming
//!
//! This crate turns a headless GUI application into a live, remotely
//! viewable session: a supervised Xvfb + guest + encoder pipeline, and
//! a WebRTC broker relaying media to concurrent remote viewers.

pub mod display;
pub mod error;
pub mod events;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
