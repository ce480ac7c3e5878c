//! One-shot message send over the store interface. No socket, no session;
//! scripts and cron jobs use this.

use anyhow::Result;

use crate::client::ApiClient;
use crate::config::CanalConfig;
use crate::models::ChannelIdentity;

pub async fn send_command(
    config: &CanalConfig,
    identity_override: Option<String>,
    to: Option<i64>,
    conversation: Option<i64>,
    content: String,
) -> Result<()> {
    let (client_config, identity) = super::client_setup(config, identity_override)?;
    let api = ApiClient::new(&client_config, identity);

    let message = match (conversation, to) {
        (Some(conversation_id), _) => api.create_message(conversation_id, &content).await?,
        (None, Some(recipient_id)) => {
            if identity != ChannelIdentity::Admin {
                anyhow::bail!("--to is an operator option; psychologists have a single channel");
            }
            api.create_message_to(recipient_id, &content).await?
        }
        (None, None) => match identity {
            ChannelIdentity::Admin => anyhow::bail!(
                "the operator must pick a destination: --to <psychologist-id> or --conversation <id>"
            ),
            ChannelIdentity::Psychologist(_) => {
                let own = api.my_conversation().await?;
                api.create_message(own.id, &content).await?
            }
        },
    };

    println!(
        "[canal: sent message {} in conversation {}]",
        message.id.unwrap_or_default(),
        message.conversation_id
    );
    Ok(())
}
