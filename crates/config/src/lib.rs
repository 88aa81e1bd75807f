//! Configuration: schema, discovery, and `${ENV}` substitution.
//!
//! Files are looked up as `zaapi.{toml,yaml,yml,json}` in the working
//! directory, then under `~/.config/zaapi/`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, data_dir, discover_and_load, find_or_default_config_path,
        load_config, save_config, set_config_dir, update_config,
    },
    schema::{
        BridgeConfig, DeviceConfig, ServerConfig, SessionsConfig, WebhookConfig, ZaapiConfig,
    },
};
