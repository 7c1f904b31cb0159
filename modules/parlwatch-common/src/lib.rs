pub mod config;
pub mod error;
pub mod records;
pub mod types;

pub use config::Config;
pub use error::IngestError;
pub use records::*;
pub use types::*;
