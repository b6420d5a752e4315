pub mod config;
pub mod error;
pub mod logging;
pub mod params;
pub mod task;

pub use error::*;
pub use params::Parameters;
pub use task::*;
