//! Turning command replies into Discord messages

use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage};
use serenity::http::Http;
use serenity::model::id::ChannelId;

use crate::commands::{Embed, Reply};

pub fn create_embed(embed: &Embed) -> CreateEmbed {
    let mut out = CreateEmbed::new().title(&embed.title).colour(embed.colour);
    if let Some(description) = &embed.description {
        out = out.description(description);
    }
    for field in &embed.fields {
        // Discord rejects empty field values
        let value = if field.value.is_empty() { "\u{200b}" } else { field.value.as_str() };
        out = out.field(&field.name, value, field.inline);
    }
    if let Some(footer) = &embed.footer {
        out = out.footer(CreateEmbedFooter::new(footer));
    }
    out
}

/// Send a reply to a channel; `Reply::None` sends nothing
pub async fn send_reply(http: &Http, channel: ChannelId, reply: Reply) -> serenity::Result<()> {
    match reply {
        Reply::Text(text) => {
            channel.say(http, text).await?;
        }
        Reply::Embed(embed) => {
            channel
                .send_message(http, CreateMessage::new().embed(create_embed(&embed)))
                .await?;
        }
        Reply::None => {}
    }
    Ok(())
}
