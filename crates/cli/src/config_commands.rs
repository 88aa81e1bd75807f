use std::path::PathBuf;

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    zaapi_config::ZaapiConfig,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path of the config file in use.
    Path,
    /// Set a single value, e.g. `zaapi config set server.port 9000`.
    Set { key: String, value: String },
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = zaapi_config::discover_and_load();
            print!("{}", toml::to_string_pretty(&config)?);
        },
        ConfigAction::Path => {
            println!("{}", zaapi_config::find_or_default_config_path().display());
        },
        ConfigAction::Set { key, value } => {
            // Validate before touching the file.
            apply(&mut ZaapiConfig::default(), &key, &value)?;
            let mut outcome = Ok(());
            let path = zaapi_config::update_config(|config| {
                outcome = apply(config, &key, &value);
            })?;
            outcome?;
            println!("{key} updated in {}", path.display());
        },
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Set one dotted key. Empty strings clear optional values.
fn apply(config: &mut ZaapiConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "server.host" => config.server.host = value.to_string(),
        "server.port" => config.server.port = parse(key, value)?,
        "server.token" => config.server.token = optional(value),
        "sessions.dir" => config.sessions.dir = optional(value).map(PathBuf::from),
        "sessions.qr_ttl_secs" => {
            let secs: u64 = parse(key, value)?;
            if secs == 0 {
                bail!("sessions.qr_ttl_secs must be positive");
            }
            config.sessions.qr_ttl_secs = secs;
        },
        "sessions.restore_on_start" => config.sessions.restore_on_start = parse(key, value)?,
        "sessions.autostart" => config.sessions.autostart = parse(key, value)?,
        "bridge.command" => config.bridge.command = value.to_string(),
        "bridge.request_timeout_secs" => config.bridge.request_timeout_secs = parse(key, value)?,
        "webhook.enabled" => config.webhook.enabled = parse(key, value)?,
        "webhook.url" => config.webhook.url = optional(value),
        "webhook.retries" => config.webhook.retries = parse(key, value)?,
        _ => {
            return Err(anyhow::anyhow!("unknown config key: {key}"))
                .context("run `zaapi config show` to see the available keys");
        },
    }
    Ok(())
}
