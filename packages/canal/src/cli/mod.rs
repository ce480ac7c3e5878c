pub mod chat;
pub mod send;

pub use chat::chat_command;
pub use send::send_command;

use anyhow::{Context, Result};

use crate::config::{CanalConfig, ClientConfig, FileConfig};
use crate::models::ChannelIdentity;

/// Resolve the client config and the identity to speak as. A CLI override
/// wins over `[client] identity` in canal.toml; with neither present the
/// operator channel is assumed.
pub(crate) fn client_setup(
    config: &CanalConfig,
    identity_override: Option<String>,
) -> Result<(ClientConfig, ChannelIdentity)> {
    let file_config: FileConfig = crate::config::load_config(&config.data_dir)
        .extract()
        .context("Invalid configuration")?;
    let client_config = ClientConfig::from_file(&file_config.client);

    let identity = match identity_override.or_else(|| client_config.identity.clone()) {
        None => ChannelIdentity::Admin,
        Some(raw) => raw
            .parse::<ChannelIdentity>()
            .map_err(|e| anyhow::anyhow!(e))?,
    };

    Ok((client_config, identity))
}
