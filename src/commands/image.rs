use crate::commands::{
    backend_for, error_embed, precheck_quota, remaining_button, send_error, send_limit_notice,
};
use crate::discord_text::embed_title;
use crate::error::BotError;
use crate::services::chat::{validate_prompt, ImageOutcome};
use crate::usage::Category;
use crate::{Context, Error};
use async_openai::types::{ImageQuality, ImageSize};
use poise::serenity_prelude as serenity;
use poise::CreateReply;
use tracing::info;

const IMAGE_PROMPT_LIMIT: usize = 1000;
const ATTACHMENT_NAME: &str = "image.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ImageShape {
    #[name = "square"]
    Square,
    #[name = "landscape"]
    Landscape,
    #[name = "portrait"]
    Portrait,
}

impl ImageShape {
    fn size(self) -> ImageSize {
        match self {
            ImageShape::Square => ImageSize::S1024x1024,
            ImageShape::Landscape => ImageSize::S1792x1024,
            ImageShape::Portrait => ImageSize::S1024x1792,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ImageFinish {
    #[name = "standard"]
    Standard,
    #[name = "hd"]
    Hd,
}

impl ImageFinish {
    fn quality(self) -> ImageQuality {
        match self {
            ImageFinish::Standard => ImageQuality::Standard,
            ImageFinish::Hd => ImageQuality::HD,
        }
    }
}

/// Generate an image with DALL-E
#[poise::command(slash_command)]
pub async fn image(
    ctx: Context<'_>,
    #[description = "The prompt to use for the image"] prompt: String,
    #[description = "The shape of the image"] shape: Option<ImageShape>,
    #[description = "The quality of the image"] quality: Option<ImageFinish>,
) -> Result<(), Error> {
    let checked = validate_prompt(&[prompt.as_str()], IMAGE_PROMPT_LIMIT)
        .and_then(|()| precheck_quota(ctx, Category::Image))
        .and_then(|()| backend_for(ctx));
    let backend = match checked {
        Ok(backend) => backend,
        Err(e) => return send_error(ctx, &e).await,
    };

    ctx.defer().await?;

    let data = ctx.data();
    let outcome = data
        .chat
        .generate_image(
            backend.as_ref(),
            ctx.author().id.get(),
            &prompt,
            shape.unwrap_or(ImageShape::Square).size(),
            quality.unwrap_or(ImageFinish::Standard).quality(),
        )
        .await;

    match outcome {
        Ok(ImageOutcome::Generated { png, quota }) => {
            let embed = serenity::CreateEmbed::new()
                .title(embed_title(&prompt))
                .image(format!("attachment://{}", ATTACHMENT_NAME))
                .color(serenity::Colour::PURPLE)
                .timestamp(serenity::Timestamp::now())
                .footer(serenity::CreateEmbedFooter::new(format!(
                    "Image generated with {}.",
                    data.config.image_model.to_uppercase()
                )));
            ctx.send(
                CreateReply::default()
                    .embed(embed)
                    .attachment(serenity::CreateAttachment::bytes(png, ATTACHMENT_NAME))
                    .components(vec![serenity::CreateActionRow::Buttons(vec![
                        remaining_button(&quota),
                    ])]),
            )
            .await?;
            info!("Image sent to {}", ctx.author().name);
            send_limit_notice(ctx, Category::Image, &quota).await
        }
        Ok(ImageOutcome::Rejected { quota }) => {
            let mut reply = CreateReply::default().embed(error_embed(&BotError::ContentPolicy));
            if let Some(quota) = &quota {
                reply = reply.components(vec![serenity::CreateActionRow::Buttons(vec![
                    remaining_button(quota),
                ])]);
            }
            ctx.send(reply).await?;
            match quota {
                Some(quota) => send_limit_notice(ctx, Category::Image, &quota).await,
                None => Ok(()),
            }
        }
        Err(e) => send_error(ctx, &e).await,
    }
}
