pub mod config;
pub mod error;
pub mod style;
pub mod types;

pub use config::Config;
pub use error::NetPersonaError;
pub use style::StyleBook;
pub use types::*;
