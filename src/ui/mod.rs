// UI module - Headless front end over the worker channels
//
// This module contains:
// - Controller: Starts build and sanitize workers and mirrors their events into state
// - EventPump: Drains a worker channel on the configured poll interval, in order

pub mod controller;
pub mod pump;

pub use controller::{Controller, reveal_in_file_manager};
pub use pump::{EventPump, WorkerEvent};
