//! Wires every crate into a running process (§10.1): loads configuration,
//! builds the agent graph, dispatcher, scheduler and command router, then
//! drives the transport's inbound stream into them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use relaybot_agent::{AgentGraph, AnthropicProvider, LlmProvider, Tool};
use relaybot_commands::CommandRouter;
use relaybot_contacts::ContactCache;
use relaybot_core::config::{self, AgentSettings};
use relaybot_core::{CoreError, Priority, SourceKey};
use relaybot_dispatcher::{BoxFuture, Dispatcher, InactivityTimers, ReplyFn};
use relaybot_media::{resolve_and_reenter, LiveMediaResolver};
use relaybot_scheduler::{CancelTaskTool, ContactRefresh, CreateTaskTool, SchedulerEngine, SessionTimers};
use relaybot_transport::{Channel, EventKind, Inbound, InboundEvent, NoticeEvent, OutboundApi, Segment};
use tracing::warn;

/// Filesystem layout for the config files named in §6. All paths are
/// relative to a single data directory (`RELAYBOT_DATA_DIR`, default `.`).
pub struct Paths {
    pub prompt: PathBuf,
    pub prompt_example: PathBuf,
    pub settings: PathBuf,
    pub permissions: PathBuf,
    pub tasks: PathBuf,
    pub log_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let root = data_dir.as_ref();
        Self {
            prompt: root.join("agent/prompt.txt"),
            prompt_example: root.join("agent/prompt.txt.example"),
            settings: root.join("agent/settings.yaml"),
            permissions: root.join("permissions.yaml"),
            tasks: root.join("tasks.json"),
            log_dir: root.join("logs"),
        }
    }
}

/// Bridges [`ContactCache`] to the scheduler crate's decoupling seam so
/// `relaybot-scheduler` never has to depend on `relaybot-contacts` directly.
struct ContactRefreshAdapter {
    contacts: Arc<ContactCache>,
    poster: Arc<dyn OutboundApi>,
}

impl ContactRefresh for ContactRefreshAdapter {
    fn refresh_all(&self) -> BoxFuture {
        let contacts = self.contacts.clone();
        let poster = self.poster.clone();
        Box::pin(async move {
            if let Err(e) = contacts.refresh_all(poster.as_ref()).await {
                warn!(error = %e, "contact cache refresh failed");
            }
        })
    }
}

pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<SchedulerEngine>,
    pub commands: Arc<CommandRouter>,
    pub contacts: Arc<ContactCache>,
    pub settings: AgentSettings,
    pub provider: Arc<dyn LlmProvider>,
    pub default_model: String,
}

/// Lets the one `Arc<dyn LlmProvider>` built for transcription double as the
/// `Box<dyn LlmProvider>` the agent graph owns outright.
struct SharedProvider(Arc<dyn LlmProvider>);

#[async_trait::async_trait]
impl LlmProvider for SharedProvider {
    fn name(&self) -> &str {
        self.0.name()
    }
    async fn send(
        &self,
        req: &relaybot_agent::ChatRequest,
    ) -> Result<relaybot_agent::ChatResponse, relaybot_agent::ProviderError> {
        self.0.send(req).await
    }
}

impl App {
    /// Builds the whole dependency graph. `poster` is the connected
    /// transport's outbound half, shared by every collaborator that needs to
    /// talk back to the chat platform.
    pub async fn build(paths: &Paths, poster: Arc<dyn OutboundApi>) -> Result<Arc<Self>, CoreError> {
        let settings = AgentSettings::load(&paths.settings).unwrap_or_else(|e| {
            warn!(error = %e, "agent/settings.yaml unreadable, using defaults");
            AgentSettings::default()
        });

        let model = std::env::var("LLM_MODEL")
            .map_err(|_| CoreError::MissingFile { path: "LLM_MODEL".to_string() })?;
        let provider_name = std::env::var("LLM_PROVIDER")
            .map_err(|_| CoreError::MissingFile { path: "LLM_PROVIDER".to_string() })?;
        let provider = build_provider(&provider_name)?;

        let system_prompt = config::load_prompt(&paths.prompt, &paths.prompt_example)?;
        let agent = Arc::new(AgentGraph::new(
            Box::new(SharedProvider(provider.clone())),
            model.clone(),
            4096,
            settings.context_limit_tokens,
            system_prompt,
        ));

        let contacts = Arc::new(ContactCache::new());
        if let Err(e) = contacts.refresh_all(poster.as_ref()).await {
            warn!(error = %e, "initial contact cache refresh failed");
        }
        let contact_refresh: Arc<dyn ContactRefresh> = Arc::new(ContactRefreshAdapter {
            contacts: contacts.clone(),
            poster: poster.clone(),
        });

        let session_timers = SessionTimers::new(
            agent.clone(),
            settings.timeout_clear_seconds,
            Some(contact_refresh.clone()),
        );

        // Dispatcher and scheduler need each other (the scheduler's tools
        // need a `Dispatcher` reference, the scheduler itself needs one to
        // enqueue fired tasks) — build the dispatcher bare, hand it to the
        // scheduler, then wire the tools and timers back in before sharing
        // either further.
        let dispatcher = Dispatcher::new(agent.clone(), settings.timeout_summarize_seconds);
        let scheduler = SchedulerEngine::new(&paths.tasks, dispatcher.clone(), agent.clone(), poster.clone());
        let tools: Vec<Box<dyn Tool>> = vec![
            Box::new(CreateTaskTool::new(scheduler.clone(), dispatcher.clone())),
            Box::new(CancelTaskTool::new(scheduler.clone())),
        ];
        dispatcher.set_tools(tools);
        dispatcher.set_timers(session_timers.clone() as Arc<dyn InactivityTimers>);

        let commands = Arc::new(CommandRouter::new(
            &paths.permissions,
            &paths.settings,
            &paths.prompt,
            &paths.prompt_example,
            &paths.log_dir,
            agent,
            dispatcher.clone(),
            scheduler.clone(),
            Some(session_timers),
            Some(contact_refresh),
            poster,
        ));

        Ok(Arc::new(Self {
            dispatcher,
            scheduler,
            commands,
            contacts,
            settings,
            provider,
            default_model: model,
        }))
    }

    /// Handles one inbound event: commands short-circuit before the parser
    /// ever runs, everything else is parsed, enqueued, and — if it left
    /// pending media behind — resolved and re-entered in the background.
    async fn handle_event(self: &Arc<Self>, event: InboundEvent, poster: Arc<dyn OutboundApi>) {
        let source = match event.kind {
            EventKind::Group => SourceKey::group(event.source_id.clone()),
            EventKind::Private => SourceKey::private(event.source_id.clone()),
        };

        if let [Segment::Text { text }] = event.segments.as_slice() {
            if self.commands.handle(&event.sender_id, text).await {
                return;
            }
        }

        let live_resolver = LiveMediaResolver::new(
            self.settings.media.clone(),
            self.provider.clone(),
            self.default_model.clone(),
            None,
        );
        let payload = relaybot_parser::parse_segments(
            &event.segments,
            &self.contacts,
            poster.as_ref(),
            &self.settings,
            Some(&live_resolver),
        )
        .await;

        let text = format!("<sender>{}</sender>{}", event.sender_name, payload.display_text);
        let reply_fn = reply_fn_for(poster, source.clone());

        if payload.media_tasks.is_empty() {
            self.dispatcher
                .enqueue(Priority::User, source, text, reply_fn, payload.content_blocks)
                .await;
            return;
        }

        self.dispatcher
            .enqueue(
                Priority::User,
                source.clone(),
                text,
                reply_fn.clone(),
                payload.content_blocks.clone(),
            )
            .await;

        let dispatcher = self.dispatcher.clone();
        let media = self.settings.media.clone();
        let provider = self.provider.clone();
        let default_model = self.default_model.clone();
        tokio::spawn(async move {
            resolve_and_reenter(
                &dispatcher,
                payload,
                source,
                reply_fn,
                &media,
                provider.as_ref(),
                &default_model,
                None,
            )
            .await;
        });
    }

    async fn handle_notice(&self, notice: NoticeEvent, poster: &dyn OutboundApi) {
        match notice {
            NoticeEvent::FriendAdd { .. } | NoticeEvent::GroupIncrease { .. } => {
                if let Err(e) = self.contacts.refresh_all(poster).await {
                    warn!(error = %e, "contact cache refresh on notice failed");
                }
            }
        }
    }

    /// Drives one channel's inbound stream until it closes. `channel` is
    /// passed twice — once as the dynamic `Channel` the loop receives from,
    /// once as the `OutboundApi` handed to each event — because they're the
    /// same connected adapter under two trait-object views.
    pub async fn run(self: Arc<Self>, channel: Arc<dyn Channel>, poster: Arc<dyn OutboundApi>) {
        while let Some(inbound) = channel.recv().await {
            match inbound {
                Inbound::Event(event) => self.handle_event(event, poster.clone()).await,
                Inbound::Notice(notice) => self.handle_notice(notice, poster.as_ref()).await,
            }
        }
    }
}

fn reply_fn_for(poster: Arc<dyn OutboundApi>, source: SourceKey) -> ReplyFn {
    Arc::new(move |text: String| -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let poster = poster.clone();
        let source = source.clone();
        Box::pin(async move {
            let result = match &source {
                SourceKey::Group(id) => poster.post_group(id, &text).await,
                SourceKey::Private(id) => poster.post_private(id, &text).await,
            };
            if let Err(e) = result {
                warn!(source = %source, error = %e, "failed to deliver reply");
            }
        })
    })
}

fn build_provider(name: &str) -> Result<Arc<dyn LlmProvider>, CoreError> {
    match name {
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| CoreError::MissingFile { path: "ANTHROPIC_API_KEY".to_string() })?;
            let base_url = std::env::var("ANTHROPIC_BASE_URL").ok();
            Ok(Arc::new(AnthropicProvider::new(api_key, base_url)))
        }
        other => Err(CoreError::Config(format!("unsupported LLM_PROVIDER: {other}"))),
    }
}
