#![recursion_limit = "256"]

pub mod config;
pub mod error;
pub mod eval;
pub mod instance;
pub mod model;
pub mod msg;
pub mod stats;

mod ssim;

pub use error::{Result, TrainError};
