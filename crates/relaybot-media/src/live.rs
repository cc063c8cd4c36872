//! Implements `relaybot_parser::MediaResolver` so the parser's inline
//! sync-processing fast path (§4.4) can resolve a small attachment right
//! where `resolve_and_reenter`'s background path would otherwise — same
//! per-kind settings, same timeout, same trimmer.

use std::sync::Arc;
use std::time::Duration;

use relaybot_agent::LlmProvider;
use relaybot_core::MediaSettings;
use relaybot_parser::{MediaKind, MediaResolver, PendingMediaTask, ResolveFuture};
use tracing::warn;

use crate::resolver;
use crate::trim::Trimmer;

pub struct LiveMediaResolver {
    media: MediaSettings,
    provider: Arc<dyn LlmProvider>,
    default_model: String,
    trimmer: Option<Arc<dyn Trimmer>>,
}

impl LiveMediaResolver {
    pub fn new(
        media: MediaSettings,
        provider: Arc<dyn LlmProvider>,
        default_model: String,
        trimmer: Option<Arc<dyn Trimmer>>,
    ) -> Self {
        Self { media, provider, default_model, trimmer }
    }
}

impl MediaResolver for LiveMediaResolver {
    fn resolve(&self, task: PendingMediaTask) -> ResolveFuture {
        let media = self.media.clone();
        let provider = self.provider.clone();
        let default_model = self.default_model.clone();
        let trimmer = self.trimmer.clone();

        Box::pin(async move {
            let type_settings = match task.media_kind {
                MediaKind::Image => media.image,
                MediaKind::Audio => media.audio,
                MediaKind::Video => media.video,
                MediaKind::Document => media.document,
            };

            let outcome = tokio::time::timeout(
                Duration::from_secs(media.timeout),
                resolver::resolve(
                    &task,
                    &type_settings,
                    &media,
                    provider.as_ref(),
                    &default_model,
                    trimmer.as_deref(),
                ),
            )
            .await;

            match outcome {
                Ok(Ok(resolved)) => (resolved.replacement, resolved.content_block),
                Ok(Err(e)) => {
                    warn!(error = %e, placeholder = %task.placeholder_id, "inline media resolution failed");
                    (format!("<{} error=\"处理失败\" />", task.media_kind.tag_name()), None)
                }
                Err(_) => {
                    warn!(placeholder = %task.placeholder_id, "inline media resolution timed out");
                    (format!("<{} error=\"处理超时\" />", task.media_kind.tag_name()), None)
                }
            }
        })
    }
}
