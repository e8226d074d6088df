pub mod config;
pub mod endpoint;
pub mod error;
pub mod export;
pub mod provider;
pub mod runtime;
pub mod store;

pub use error::ProviderError;
pub use provider::{WikipediaApi, WikipediaProvider};
pub use store::TokenStore;
