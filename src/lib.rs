#[macro_use]
extern crate quick_error;

pub mod bulletinboard;
pub mod config;
pub mod crypto;
pub mod data;
pub mod election;
pub mod error;
pub mod local;
pub mod protocol;
pub mod service;
pub mod util;

pub use config::Config;
pub use error::Error;
pub use service::{OpenElection, Service};
