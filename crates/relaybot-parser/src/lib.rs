//! Converts a structured inbound event into a display string with inline
//! tags, a list of pending media tasks, and a list of raw content blocks for
//! multimodal passthrough (§2, "Message parser"; §4.4).
//!
//! Grounded on `message_parser.py`: placeholder-tag generation, the
//! image/record/video/file → image/audio/video/document type map, the
//! `@全体成员` / `@<remark>` rendering rule, the `<face .../>` fallback, and
//! the `<reply_to>` truncation/fallback rule.

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use relaybot_contacts::ContactCache;
use relaybot_core::{AgentSettings, MediaSettings, MediaTypeSettings};
use relaybot_transport::{MediaSegment, OutboundApi, Segment};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub type ResolveFuture = Pin<Box<dyn Future<Output = (String, Option<serde_json::Value>)> + Send>>;

/// Decoupling seam for the inline sync-processing fast path (§4.4): a small
/// enough attachment is resolved synchronously during parsing instead of
/// being left as a placeholder + `PendingMediaTask`. This crate never
/// depends on `relaybot-agent`/`relaybot-media` directly — the binary wires
/// a concrete resolver in.
pub trait MediaResolver: Send + Sync {
    /// Resolve one attachment, returning the text to splice into
    /// `display_text` in place of its tag and an optional multimodal content
    /// block (passthrough only).
    fn resolve(&self, task: PendingMediaTask) -> ResolveFuture;
}

/// Which media family a pending task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn tag_name(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }
}

/// A media attachment whose processing (transcribe or passthrough) hasn't
/// happened yet — the parser only describes *what* needs resolving; the
/// media sidecar crate is the one that actually resolves it.
#[derive(Debug, Clone)]
pub struct PendingMediaTask {
    pub placeholder_id: String,
    pub media_kind: MediaKind,
    pub filename: String,
    /// Exact substring present in `display_text` that must be substituted
    /// with the resolved result.
    pub placeholder_tag: String,
    pub url: Option<String>,
    pub file_size: Option<u64>,
}

/// Output of parsing one inbound event.
#[derive(Debug, Clone, Default)]
pub struct ParsedPayload {
    pub display_text: String,
    pub media_tasks: Vec<PendingMediaTask>,
    pub content_blocks: Vec<serde_json::Value>,
}

/// Parse every segment of an inbound event into a `ParsedPayload`.
///
/// `contacts` resolves `@user_id` to a display remark; `api` is used to
/// fetch the original message text for `reply` segments (best-effort — a
/// failure becomes the `"无法获取原消息"` fallback, never an error return).
pub async fn parse_segments(
    segments: &[Segment],
    contacts: &ContactCache,
    api: &dyn OutboundApi,
    settings: &AgentSettings,
    resolver: Option<&dyn MediaResolver>,
) -> ParsedPayload {
    let mut payload = ParsedPayload::default();
    let mut counter: u64 = 0;

    for seg in segments {
        match seg {
            Segment::Text { text } => payload.display_text.push_str(text),
            Segment::At { user_id } => {
                let rendered = match user_id {
                    None => "@全体成员".to_string(),
                    Some(id) => format!("@{}", contacts.get_remark(id)),
                };
                payload.display_text.push_str(&rendered);
            }
            Segment::Face { id } => {
                let _ = write!(payload.display_text, "<face name=\"{id}\" />");
            }
            Segment::Reply { message_id } => {
                let rendered = resolve_reply(api, message_id, settings.reply_max_length).await;
                let _ = write!(payload.display_text, "<reply_to>{rendered}</reply_to>");
            }
            Segment::Image(m) => {
                parse_media(
                    MediaKind::Image,
                    m,
                    &settings.media.image,
                    &settings.media,
                    resolver,
                    &mut payload,
                    &mut counter,
                )
                .await;
            }
            Segment::Record(m) => {
                parse_media(
                    MediaKind::Audio,
                    m,
                    &settings.media.audio,
                    &settings.media,
                    resolver,
                    &mut payload,
                    &mut counter,
                )
                .await;
            }
            Segment::Video(m) => {
                parse_media(
                    MediaKind::Video,
                    m,
                    &settings.media.video,
                    &settings.media,
                    resolver,
                    &mut payload,
                    &mut counter,
                )
                .await;
            }
            Segment::File(m) => {
                parse_media(
                    MediaKind::Document,
                    m,
                    &settings.media.document,
                    &settings.media,
                    resolver,
                    &mut payload,
                    &mut counter,
                )
                .await;
            }
        }
    }

    debug!(
        media_tasks = payload.media_tasks.len(),
        "parsed inbound segments"
    );
    payload
}

/// §4.4 "sync-processing fast path": an attachment at or under
/// `media.sync_process_threshold_mb` is resolved inline, right here, instead
/// of being left as a placeholder for the dispatcher to pick up later. An
/// unknown file size is treated as large (placeholder flow) — matching the
/// original's "no size means don't risk blocking the turn" behavior.
async fn parse_media(
    kind: MediaKind,
    seg: &MediaSegment,
    type_settings: &MediaTypeSettings,
    media: &MediaSettings,
    resolver: Option<&dyn MediaResolver>,
    payload: &mut ParsedPayload,
    counter: &mut u64,
) {
    let tag = kind.tag_name();
    let filename = seg.file_name.clone().unwrap_or_default();

    if !type_settings.transcribe && !type_settings.passthrough {
        let _ = write!(payload.display_text, "<{tag} />");
        return;
    }

    *counter += 1;
    let placeholder_id = format!("{:012x}", placeholder_seed(*counter));
    let placeholder_tag = format!("<{tag} status=\"loading\" filename=\"{filename}\" />");

    let task = PendingMediaTask {
        placeholder_id,
        media_kind: kind,
        filename,
        placeholder_tag: placeholder_tag.clone(),
        url: seg.url.clone(),
        file_size: seg.file_size,
    };

    let under_threshold = media
        .sync_process_threshold_mb
        .zip(task.file_size)
        .is_some_and(|(threshold_mb, size)| size <= threshold_mb * 1024 * 1024);

    if under_threshold {
        if let Some(resolver) = resolver {
            let (replacement, content_block) = resolver.resolve(task).await;
            payload.display_text.push_str(&replacement);
            if let Some(block) = content_block {
                payload.content_blocks.push(block);
            }
            return;
        }
    }

    payload.display_text.push_str(&placeholder_tag);
    payload.media_tasks.push(task);
}

/// Deterministic 48-bit seed for a placeholder id within one parse call —
/// uniqueness only needs to hold within a single `display_text`, not globally.
fn placeholder_seed(counter: u64) -> u64 {
    counter.wrapping_mul(0x9E3779B97F4A7C15) & 0xFFFF_FFFF_FFFF
}

async fn resolve_reply(api: &dyn OutboundApi, message_id: &str, max_len: usize) -> String {
    match api.get_msg(message_id).await {
        Ok(Some(msg)) => {
            let mut text = msg.text;
            if text.chars().count() > max_len {
                text = text.chars().take(max_len).collect::<String>() + "...";
            }
            text
        }
        _ => "无法获取原消息".to_string(),
    }
}

/// Substitute every resolved placeholder into `display_text`, used when the
/// media sidecar re-enqueues a follow-up turn (§9, "Media result delivery").
pub fn apply_resolved(display_text: &str, resolved: &[(String, String)]) -> String {
    let mut out = display_text.to_string();
    for (placeholder, value) in resolved {
        out = out.replace(placeholder.as_str(), value.as_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_transport::{ChannelError, FriendInfo, GroupInfo, RawMessage};
    use std::path::Path;

    struct FakeApi {
        msg: Option<RawMessage>,
    }

    #[async_trait]
    impl OutboundApi for FakeApi {
        async fn post_group(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn post_private(&self, _: &str, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn upload_private_file(&self, _: &str, _: &Path, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn get_msg(&self, _: &str) -> Result<Option<RawMessage>, ChannelError> {
            Ok(self.msg.clone())
        }
        async fn get_group_info(&self, _: &str) -> Result<Option<GroupInfo>, ChannelError> {
            Ok(None)
        }
        async fn get_friend_list(&self) -> Result<Vec<FriendInfo>, ChannelError> {
            Ok(vec![])
        }
        async fn get_group_list(&self, _: bool) -> Result<Vec<GroupInfo>, ChannelError> {
            Ok(vec![])
        }
        async fn get_group_file_url(&self, _: &str, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
        async fn get_private_file_url(&self, _: &str) -> Result<Option<String>, ChannelError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn text_and_at_all_render_plainly() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let settings = AgentSettings::default();
        let segs = vec![
            Segment::Text {
                text: "hello ".into(),
            },
            Segment::At { user_id: None },
        ];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.display_text, "hello @全体成员");
    }

    #[tokio::test]
    async fn unknown_face_falls_back_to_bare_tag_with_name() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let settings = AgentSettings::default();
        let segs = vec![Segment::Face { id: "99".into() }];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.display_text, "<face name=\"99\" />");
    }

    #[tokio::test]
    async fn reply_resolves_and_truncates() {
        let contacts = ContactCache::new();
        let api = FakeApi {
            msg: Some(RawMessage {
                message_id: "m1".into(),
                sender_name: "Alice".into(),
                text: "0123456789ABCDEF".into(),
            }),
        };
        let mut settings = AgentSettings::default();
        settings.reply_max_length = 5;
        let segs = vec![Segment::Reply {
            message_id: "m1".into(),
        }];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.display_text, "<reply_to>01234...</reply_to>");
    }

    #[tokio::test]
    async fn reply_missing_message_falls_back() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let settings = AgentSettings::default();
        let segs = vec![Segment::Reply {
            message_id: "gone".into(),
        }];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.display_text, "<reply_to>无法获取原消息</reply_to>");
    }

    #[tokio::test]
    async fn media_with_no_modes_enabled_emits_bare_tag() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let settings = AgentSettings::default();
        let segs = vec![Segment::Image(MediaSegment {
            url: Some("http://x/y.jpg".into()),
            file_name: Some("pic.jpg".into()),
            file_size: Some(500_000),
        })];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.display_text, "<image />");
        assert!(payload.media_tasks.is_empty());
    }

    #[tokio::test]
    async fn media_with_transcribe_enabled_creates_pending_task() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let mut settings = AgentSettings::default();
        settings.media.image.transcribe = true;
        let segs = vec![Segment::Image(MediaSegment {
            url: Some("http://x/y.jpg".into()),
            file_name: Some("pic.jpg".into()),
            file_size: Some(500_000),
        })];
        let payload = parse_segments(&segs, &contacts, &api, &settings, None).await;
        assert_eq!(payload.media_tasks.len(), 1);
        let task = &payload.media_tasks[0];
        assert!(payload.display_text.contains(&task.placeholder_tag));
        assert!(task.placeholder_tag.contains("status=\"loading\""));
        assert!(task.placeholder_tag.contains("pic.jpg"));
    }

    struct EchoResolver;

    impl MediaResolver for EchoResolver {
        fn resolve(&self, task: PendingMediaTask) -> ResolveFuture {
            Box::pin(async move {
                let tag = task.media_kind.tag_name();
                (format!("<{tag} filename=\"{}\">a cat</{tag}>", task.filename), None)
            })
        }
    }

    #[tokio::test]
    async fn small_file_under_threshold_resolves_inline() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let mut settings = AgentSettings::default();
        settings.media.image.transcribe = true;
        settings.media.sync_process_threshold_mb = Some(1);
        let resolver = EchoResolver;
        let segs = vec![Segment::Image(MediaSegment {
            url: Some("http://x/y.jpg".into()),
            file_name: Some("pic.jpg".into()),
            file_size: Some(500_000),
        })];
        let payload = parse_segments(&segs, &contacts, &api, &settings, Some(&resolver)).await;
        assert!(payload.media_tasks.is_empty());
        assert_eq!(payload.display_text, "<image filename=\"pic.jpg\">a cat</image>");
        assert!(!payload.display_text.contains("loading"));
    }

    #[tokio::test]
    async fn large_file_over_threshold_still_uses_placeholder() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let mut settings = AgentSettings::default();
        settings.media.image.transcribe = true;
        settings.media.sync_process_threshold_mb = Some(1);
        let resolver = EchoResolver;
        let segs = vec![Segment::Image(MediaSegment {
            url: Some("http://x/y.jpg".into()),
            file_name: Some("pic.jpg".into()),
            file_size: Some(5_000_000),
        })];
        let payload = parse_segments(&segs, &contacts, &api, &settings, Some(&resolver)).await;
        assert_eq!(payload.media_tasks.len(), 1);
        assert!(payload.display_text.contains("status=\"loading\""));
    }

    #[tokio::test]
    async fn unknown_file_size_uses_placeholder_even_under_threshold_config() {
        let contacts = ContactCache::new();
        let api = FakeApi { msg: None };
        let mut settings = AgentSettings::default();
        settings.media.image.transcribe = true;
        settings.media.sync_process_threshold_mb = Some(1);
        let resolver = EchoResolver;
        let segs = vec![Segment::Image(MediaSegment {
            url: Some("http://x/y.jpg".into()),
            file_name: Some("pic.jpg".into()),
            file_size: None,
        })];
        let payload = parse_segments(&segs, &contacts, &api, &settings, Some(&resolver)).await;
        assert_eq!(payload.media_tasks.len(), 1);
    }

    #[test]
    fn apply_resolved_substitutes_placeholder() {
        let display = "before <image status=\"loading\" filename=\"a.jpg\" /> after";
        let resolved = vec![(
            "<image status=\"loading\" filename=\"a.jpg\" />".to_string(),
            "<image filename=\"a.jpg\">a cat</image>".to_string(),
        )];
        let out = apply_resolved(display, &resolved);
        assert_eq!(out, "before <image filename=\"a.jpg\">a cat</image> after");
    }
}
