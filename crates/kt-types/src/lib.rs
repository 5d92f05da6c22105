pub mod config;
pub mod errors;
pub mod params;
pub mod records;

pub use config::*;
pub use errors::*;
pub use params::*;
pub use records::*;
