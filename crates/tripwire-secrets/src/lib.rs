//! Secret providers and resolution for Tripwire.

pub mod manager;
pub mod providers;

pub use manager::{SecretManager, SecretManagerConfig};
pub use providers::{EnvProvider, FileProvider, SecretProvider};
