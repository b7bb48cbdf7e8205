pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Policy};
pub use error::FlocktendError;
pub use types::*;
