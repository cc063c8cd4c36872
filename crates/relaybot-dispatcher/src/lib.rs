//! Priority queue, per-source batching, single worker (§4.1 "Dispatcher").
//!
//! Grounded on `scheduler.py`'s `_enqueue_ready`/`_process_loop`/`_batch`:
//! draining the whole queue per pass, grouping by source while preserving
//! first-seen order, and replying only through the last reply_fn of a group.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use relaybot_agent::{AgentGraph, Reason, Tool};
use relaybot_core::{Priority, SourceKey};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ReplyFn = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

/// Collaborator that schedules the two post-batch inactivity timers. The
/// dispatcher knows nothing about cron or persistence — just these two
/// effects (§4.1 step 4).
pub trait InactivityTimers: Send + Sync {
    fn schedule_summarize(&self, delay_seconds: u64);
    fn cancel_clear(&self);
}

struct QueueEntry {
    priority: Priority,
    seq: u64,
    source: SourceKey,
    text: String,
    reply_fn: ReplyFn,
    content_blocks: Vec<Value>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    worker_running: bool,
    current_source: Option<SourceKey>,
    counter: u64,
}

pub struct Dispatcher {
    state: Mutex<QueueState>,
    agent: Arc<AgentGraph>,
    tools: OnceLock<Vec<Box<dyn Tool>>>,
    timers: OnceLock<Arc<dyn InactivityTimers>>,
    timeout_summarize_seconds: u64,
}

impl Dispatcher {
    /// `tools` and `timers` start empty — see [`Dispatcher::set_tools`] and
    /// [`Dispatcher::set_timers`]. The scheduler's task tools need an
    /// `Arc<Dispatcher>` to construct, and the dispatcher needs the
    /// scheduler's tools, so neither can be ready at construction time.
    pub fn new(agent: Arc<AgentGraph>, timeout_summarize_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                worker_running: false,
                current_source: None,
                counter: 0,
            }),
            agent,
            tools: OnceLock::new(),
            timers: OnceLock::new(),
            timeout_summarize_seconds,
        })
    }

    /// Wiring-time hook: set the tool set once, after every collaborator
    /// that needed an `Arc<Dispatcher>` to build its own tools has already
    /// cloned one. A second call is silently ignored.
    pub fn set_tools(&self, tools: Vec<Box<dyn Tool>>) {
        let _ = self.tools.set(tools);
    }

    /// Wiring-time hook for the post-batch inactivity timers collaborator
    /// (`SessionTimers`). A second call is silently ignored.
    pub fn set_timers(&self, timers: Arc<dyn InactivityTimers>) {
        let _ = self.timers.set(timers);
    }

    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn current_source(&self) -> Option<SourceKey> {
        self.state.lock().await.current_source.clone()
    }

    /// §4.1 `Enqueue`. `content_blocks` carries multimodal data destined for
    /// the LLM unchanged — media resolution itself is the caller's job
    /// (`relaybot-media`), not the dispatcher's: the dispatcher never learns
    /// that a placeholder text it's carrying will later be followed up.
    pub async fn enqueue(
        self: &Arc<Self>,
        priority: Priority,
        source: SourceKey,
        text: String,
        reply_fn: ReplyFn,
        content_blocks: Vec<Value>,
    ) {
        let should_start = {
            let mut state = self.state.lock().await;
            state.counter += 1;
            let seq = state.counter;
            state.heap.push(Reverse(QueueEntry {
                priority,
                seq,
                source,
                text,
                reply_fn,
                content_blocks,
            }));
            let should_start = !state.worker_running;
            if should_start {
                state.worker_running = true;
            } else {
                info!(depth = state.heap.len(), "queued");
            }
            should_start
        };

        if should_start {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.worker_loop().await });
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let batch = {
                let mut state = self.state.lock().await;
                if state.heap.is_empty() {
                    state.worker_running = false;
                    state.current_source = None;
                    return;
                }
                let mut items = Vec::with_capacity(state.heap.len());
                while let Some(Reverse(entry)) = state.heap.pop() {
                    items.push(entry);
                }
                items
            };

            for group in group_by_source(batch) {
                {
                    let mut state = self.state.lock().await;
                    state.current_source = Some(group.source.clone());
                }
                info!(source = %group.source, batch = group.texts.len(), "processing batch");

                let text = group.texts.join("\n");
                let reply_fn = group.reply_fns.last().unwrap().clone();

                if let Err(e) = self.run_group(text, group.content_blocks, reply_fn).await {
                    warn!(error = %e, "dispatcher worker: agent invocation failed");
                    let mut state = self.state.lock().await;
                    state.worker_running = false;
                    state.current_source = None;
                    return;
                }
            }

            if self.agent.history_len().await > 0 {
                if let Some(timers) = self.timers.get() {
                    timers.schedule_summarize(self.timeout_summarize_seconds);
                    timers.cancel_clear();
                }
            }
        }
    }

    async fn run_group(
        &self,
        text: String,
        content_blocks: Vec<Value>,
        reply_fn: ReplyFn,
    ) -> Result<(), relaybot_agent::ProviderError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let on_segment = move |segment: String| {
            let _ = tx.send(segment);
        };

        let drain = async {
            while let Some(segment) = rx.recv().await {
                (reply_fn)(segment).await;
            }
        };

        let no_tools: &[Box<dyn Tool>] = &[];
        let tools = self.tools.get().map(Vec::as_slice).unwrap_or(no_tools);
        let invoke = self
            .agent
            .invoke(Reason::UserMessage, text, content_blocks, tools, on_segment);

        let (result, ()) = tokio::join!(invoke, drain);
        result
    }
}

struct SourceGroup {
    source: SourceKey,
    texts: Vec<String>,
    reply_fns: Vec<ReplyFn>,
    content_blocks: Vec<Value>,
}

/// Group a drained batch by source, preserving first-seen group order and
/// arrival order within each group (§4.1 step 2).
fn group_by_source(batch: Vec<QueueEntry>) -> Vec<SourceGroup> {
    let mut groups: Vec<SourceGroup> = Vec::new();
    for entry in batch {
        if let Some(group) = groups.iter_mut().find(|g| g.source == entry.source) {
            group.texts.push(entry.text);
            group.reply_fns.push(entry.reply_fn);
            group.content_blocks.extend(entry.content_blocks);
        } else {
            groups.push(SourceGroup {
                source: entry.source,
                texts: vec![entry.text],
                reply_fns: vec![entry.reply_fn],
                content_blocks: entry.content_blocks,
            });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_agent::{ChatRequest, ChatResponse, LlmProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(
            &self,
            req: &ChatRequest,
        ) -> Result<ChatResponse, relaybot_agent::ProviderError> {
            Ok(ChatResponse {
                content: "ok".into(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    #[tokio::test]
    async fn enqueue_drains_and_replies_with_last_reply_fn_of_group() {
        let agent = Arc::new(AgentGraph::new(Box::new(EchoProvider), "m".into(), 4096, 8000, None));
        let dispatcher = Dispatcher::new(agent, 60);

        let received: Arc<TokioMutex<Vec<String>>> = Arc::new(TokioMutex::new(Vec::new()));
        let called = Arc::new(AtomicUsize::new(0));

        let make_reply_fn = |received: Arc<TokioMutex<Vec<String>>>, called: Arc<AtomicUsize>| -> ReplyFn {
            Arc::new(move |seg: String| {
                let received = received.clone();
                let called = called.clone();
                Box::pin(async move {
                    called.fetch_add(1, Ordering::SeqCst);
                    received.lock().await.push(seg);
                })
            })
        };

        let source = SourceKey::group("g1");
        dispatcher
            .enqueue(
                Priority::User,
                source.clone(),
                "hi".into(),
                make_reply_fn(received.clone(), called.clone()),
                vec![],
            )
            .await;

        // give the spawned worker a moment to drain
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(dispatcher.queue_depth().await, 0);
        assert_eq!(*received.lock().await, vec!["ok".to_string()]);
    }

    #[test]
    fn group_by_source_preserves_first_seen_order() {
        let reply: ReplyFn = Arc::new(|_| Box::pin(async {}));
        let batch = vec![
            QueueEntry {
                priority: Priority::User,
                seq: 1,
                source: SourceKey::group("a"),
                text: "1".into(),
                reply_fn: reply.clone(),
                content_blocks: vec![],
            },
            QueueEntry {
                priority: Priority::User,
                seq: 2,
                source: SourceKey::group("b"),
                text: "2".into(),
                reply_fn: reply.clone(),
                content_blocks: vec![],
            },
            QueueEntry {
                priority: Priority::User,
                seq: 3,
                source: SourceKey::group("a"),
                text: "3".into(),
                reply_fn: reply,
                content_blocks: vec![],
            },
        ];
        let groups = group_by_source(batch);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].source, SourceKey::group("a"));
        assert_eq!(groups[0].texts, vec!["1", "3"]);
        assert_eq!(groups[1].source, SourceKey::group("b"));
    }
}
