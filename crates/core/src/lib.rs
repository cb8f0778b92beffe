#![forbid(unsafe_code)]

pub mod access;
pub mod grading;
pub mod model;
pub mod progression;
pub mod time;

pub use time::Clock;
