//! Configuration loading for the manifold multiplexer.
//!
//! Config is discovered as manifold.{toml,yaml,yml,json} in the working
//! directory, then in ~/.config/manifold/. String values support `${ENV}`
//! substitution. Missing config falls back to defaults.

pub mod env;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config, set_config_dir},
    schema::{GatewayConfig, ManifoldConfig, ServerConfig, StorageConfig},
};
