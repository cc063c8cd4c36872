//! Inactivity timers: `session_summarize` then `session_clear` (§4.1 step 4).
//!
//! Grounded on `scheduler.py`'s `_on_session_summarize`/`_on_session_clear`,
//! which invoke the agent directly rather than through the priority queue —
//! there is no reply to deliver and no source to batch by, only the agent
//! lock's single-flight guarantee matters here. `replace_existing` becomes
//! "abort the previous timer task before starting a new one".

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use relaybot_agent::{AgentGraph, Reason};
use relaybot_dispatcher::{BoxFuture, InactivityTimers};
use tokio::task::JoinHandle;
use tracing::error;

/// Decoupling seam so this crate never depends on `relaybot-contacts`.
pub trait ContactRefresh: Send + Sync {
    fn refresh_all(&self) -> BoxFuture;
}

struct Inner {
    agent: Arc<AgentGraph>,
    timeout_clear_seconds: u64,
    contacts: Option<Arc<dyn ContactRefresh>>,
    summarize_handle: StdMutex<Option<JoinHandle<()>>>,
    clear_handle: StdMutex<Option<JoinHandle<()>>>,
    summarize_deadline: StdMutex<Option<Instant>>,
}

impl Inner {
    fn schedule_clear(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(inner.timeout_clear_seconds)).await;
            inner.agent.clear_history().await;
            if let Some(contacts) = &inner.contacts {
                contacts.refresh_all().await;
            }
        });
        if let Some(prev) = self.clear_handle.lock().unwrap().replace(handle) {
            prev.abort();
        }
    }
}

pub struct SessionTimers {
    inner: Arc<Inner>,
}

impl SessionTimers {
    pub fn new(
        agent: Arc<AgentGraph>,
        timeout_clear_seconds: u64,
        contacts: Option<Arc<dyn ContactRefresh>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                agent,
                timeout_clear_seconds,
                contacts,
                summarize_handle: StdMutex::new(None),
                clear_handle: StdMutex::new(None),
                summarize_deadline: StdMutex::new(None),
            }),
        })
    }

    /// `/status`'s "超时倒计时": seconds until `session_summarize` fires, or
    /// `None` when no timer is pending (mirrors `commands.py`'s APScheduler
    /// `get_job("session_summarize").next_run_time` lookup).
    pub fn remaining_summarize_seconds(&self) -> Option<i64> {
        let deadline = (*self.inner.summarize_deadline.lock().unwrap())?;
        Some(deadline.saturating_duration_since(Instant::now()).as_secs() as i64)
    }
}

impl InactivityTimers for SessionTimers {
    fn schedule_summarize(&self, delay_seconds: u64) {
        *self.inner.summarize_deadline.lock().unwrap() =
            Some(Instant::now() + Duration::from_secs(delay_seconds));

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
            *inner.summarize_deadline.lock().unwrap() = None;
            if let Err(e) = inner
                .agent
                .invoke(Reason::SessionTimeout, String::new(), Vec::new(), &[], |_| {})
                .await
            {
                error!(error = %e, "session-timeout summarize failed");
            }
            inner.schedule_clear();
        });
        if let Some(prev) = self.inner.summarize_handle.lock().unwrap().replace(handle) {
            prev.abort();
        }
    }

    fn cancel_clear(&self) {
        if let Some(prev) = self.inner.clear_handle.lock().unwrap().take() {
            prev.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relaybot_agent::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
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
    async fn cancel_clear_does_not_wipe_pending_summarize_deadline() {
        let agent = Arc::new(AgentGraph::new(Box::new(EchoProvider), "m".into(), 4096, 8000, None));
        let timers = SessionTimers::new(agent, 60, None);

        // mirrors the dispatcher's worker loop: schedule_summarize immediately
        // followed by cancel_clear once a new batch arrives.
        timers.schedule_summarize(60);
        timers.cancel_clear();

        assert!(timers.remaining_summarize_seconds().is_some());
    }
}
