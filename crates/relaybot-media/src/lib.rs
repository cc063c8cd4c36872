//! Resolves the pending media tasks a parsed payload leaves behind, then
//! re-enters the dispatcher with the placeholder tags substituted for their
//! resolved content (§4.4 "Media pipeline").
//!
//! Grounded on `scheduler.py`'s `_resolve_media_tasks`/`_resolve_one`: each
//! task gets its own timeout, failures degrade to an error tag rather than
//! dropping the message, and the follow-up re-enters at a lower priority
//! than the triggering user message.

pub mod error;
pub mod live;
pub mod resolver;
pub mod trim;

pub use error::MediaError;
pub use live::LiveMediaResolver;
pub use resolver::ResolvedMedia;
pub use trim::Trimmer;

use std::sync::Arc;
use std::time::Duration;

use relaybot_agent::LlmProvider;
use relaybot_core::{MediaSettings, Priority, SourceKey};
use relaybot_dispatcher::{Dispatcher, ReplyFn};
use relaybot_parser::{apply_resolved, ParsedPayload};
use tracing::warn;

pub type Result<T> = std::result::Result<T, MediaError>;

/// Resolve every pending task in `payload` and, if any were present, enqueue
/// the substituted follow-up back into the dispatcher. No-op when the
/// payload carried no media tasks.
#[allow(clippy::too_many_arguments)]
pub async fn resolve_and_reenter(
    dispatcher: &Arc<Dispatcher>,
    payload: ParsedPayload,
    source: SourceKey,
    reply_fn: ReplyFn,
    media: &MediaSettings,
    provider: &dyn LlmProvider,
    default_model: &str,
    trimmer: Option<&dyn Trimmer>,
) {
    if payload.media_tasks.is_empty() {
        return;
    }

    let mut resolved_pairs = Vec::with_capacity(payload.media_tasks.len());
    let mut content_blocks = payload.content_blocks;

    for task in &payload.media_tasks {
        let type_settings = match task.media_kind {
            relaybot_parser::MediaKind::Image => &media.image,
            relaybot_parser::MediaKind::Audio => &media.audio,
            relaybot_parser::MediaKind::Video => &media.video,
            relaybot_parser::MediaKind::Document => &media.document,
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(media.timeout),
            resolver::resolve(task, type_settings, media, provider, default_model, trimmer),
        )
        .await;

        let resolved = match outcome {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                warn!(error = %e, placeholder = %task.placeholder_id, "media resolution failed");
                ResolvedMedia {
                    replacement: format!("<{} error=\"处理失败\" />", task.media_kind.tag_name()),
                    content_block: None,
                }
            }
            Err(_) => {
                warn!(placeholder = %task.placeholder_id, "media resolution timed out");
                ResolvedMedia {
                    replacement: format!("<{} error=\"处理超时\" />", task.media_kind.tag_name()),
                    content_block: None,
                }
            }
        };

        if let Some(block) = resolved.content_block {
            content_blocks.push(block);
        }
        resolved_pairs.push((task.placeholder_tag.clone(), resolved.replacement));
    }

    let text = apply_resolved(&payload.display_text, &resolved_pairs);
    dispatcher
        .enqueue(Priority::Auto, source, text, reply_fn, content_blocks)
        .await;
}
