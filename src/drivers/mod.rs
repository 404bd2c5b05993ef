//! Low-level platform helpers.

pub mod task_pin;
