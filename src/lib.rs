pub mod config;
pub mod discovery;
pub mod error;
pub mod observability;
pub mod settings;
pub mod store;
pub mod tls;

pub use error::{CertError, CertResult};
