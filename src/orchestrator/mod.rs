//! Application-level orchestration.
//!
//! This module owns run lifecycle control (start/stop/auto-retry) on behalf of the UI.
//! Presentation layers send `UiCommand`s and only ever read supervisor events.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
