//! Agent sessions and composable context filters.
//!
//! The session is the single ordered message log per (invocation, agent).
//! Filters derive a view for one turn; they never mutate the log.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tactus_contract::procedure::FilterSpec;
use tactus_contract::{Role, SessionMessage, VisibilityClass};

/// Message logs for every agent of one invocation.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<std::collections::HashMap<String, Vec<SessionMessage>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to an agent's session.
    pub fn append(&self, agent: &str, message: SessionMessage) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .entry(agent.to_string())
            .or_default()
            .push(message);
    }

    /// Full history for an agent, oldest first.
    pub fn history(&self, agent: &str) -> Vec<SessionMessage> {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(agent)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the agent has any messages yet.
    pub fn is_empty(&self, agent: &str) -> bool {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(agent)
            .map_or(true, Vec::is_empty)
    }

    /// Drop every message of an agent's session.
    pub fn clear(&self, agent: &str) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .remove(agent);
    }

    /// Replace an agent's session wholesale (used by `load_from`).
    pub fn replace(&self, agent: &str, messages: Vec<SessionMessage>) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(agent.to_string(), messages);
    }
}

/// A view-producing filter over session messages.
pub trait ContextFilter: Send + Sync {
    /// Derive the visible message list from the session history.
    fn apply(&self, messages: Vec<SessionMessage>) -> Vec<SessionMessage>;
}

/// Rough token estimate: four characters per token plus per-message overhead.
fn estimate_tokens(message: &SessionMessage) -> usize {
    message.content.len() / 4 + 4
}

/// Drops oldest non-system messages until the estimated token count fits.
pub struct TokenBudget {
    max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl ContextFilter for TokenBudget {
    fn apply(&self, messages: Vec<SessionMessage>) -> Vec<SessionMessage> {
        let system_cost: usize = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(estimate_tokens)
            .sum();

        // Walk newest-first, keeping what fits after the system messages.
        let mut budget = self.max_tokens.saturating_sub(system_cost);
        let mut keep: HashSet<String> = HashSet::new();
        for message in messages.iter().rev() {
            if message.role == Role::System {
                continue;
            }
            let cost = estimate_tokens(message);
            if cost > budget {
                break;
            }
            budget -= cost;
            keep.insert(message.id.clone());
        }

        messages
            .into_iter()
            .filter(|m| m.role == Role::System || keep.contains(&m.id))
            .collect()
    }
}

/// Retains only the last `count` tool-result messages.
pub struct LimitToolResults {
    count: usize,
}

impl LimitToolResults {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl ContextFilter for LimitToolResults {
    fn apply(&self, messages: Vec<SessionMessage>) -> Vec<SessionMessage> {
        let tool_total = messages.iter().filter(|m| m.role == Role::Tool).count();
        let drop = tool_total.saturating_sub(self.count);
        let mut seen = 0usize;
        messages
            .into_iter()
            .filter(|m| {
                if m.role != Role::Tool {
                    return true;
                }
                seen += 1;
                seen > drop
            })
            .collect()
    }
}

/// Drops messages whose visibility class is in the set.
pub struct HideClass {
    classes: HashSet<VisibilityClass>,
}

impl HideClass {
    pub fn new(classes: impl IntoIterator<Item = VisibilityClass>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }
}

impl ContextFilter for HideClass {
    fn apply(&self, messages: Vec<SessionMessage>) -> Vec<SessionMessage> {
        messages
            .into_iter()
            .filter(|m| !self.classes.contains(&m.visibility))
            .collect()
    }
}

/// Applies child filters in order; each receives the previous output.
pub struct Composed {
    chain: Vec<Arc<dyn ContextFilter>>,
}

impl Composed {
    pub fn new(chain: Vec<Arc<dyn ContextFilter>>) -> Self {
        Self { chain }
    }

    /// Identity filter.
    pub fn empty() -> Self {
        Self { chain: Vec::new() }
    }
}

impl ContextFilter for Composed {
    fn apply(&self, messages: Vec<SessionMessage>) -> Vec<SessionMessage> {
        self.chain
            .iter()
            .fold(messages, |acc, filter| filter.apply(acc))
    }
}

/// Build the filter chain declared on an agent config.
pub fn build_chain(specs: &[FilterSpec]) -> Arc<dyn ContextFilter> {
    let chain: Vec<Arc<dyn ContextFilter>> = specs
        .iter()
        .map(|spec| -> Arc<dyn ContextFilter> {
            match spec {
                FilterSpec::TokenBudget { max_tokens } => Arc::new(TokenBudget::new(*max_tokens)),
                FilterSpec::LimitToolResults { count } => Arc::new(LimitToolResults::new(*count)),
                FilterSpec::HideClass { classes } => Arc::new(HideClass::new(classes.clone())),
            }
        })
        .collect();
    Arc::new(Composed::new(chain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Vec<SessionMessage> {
        vec![
            SessionMessage::system("be helpful"),
            SessionMessage::user("first"),
            SessionMessage::tool("c1", "result one"),
            SessionMessage::assistant("answer"),
            SessionMessage::tool("c2", "result two"),
            SessionMessage::user("second").with_visibility(VisibilityClass::Notification),
        ]
    }

    #[test]
    fn limit_tool_results_keeps_latest() {
        let out = LimitToolResults::new(1).apply(transcript());
        let tools: Vec<_> = out.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_call_id.as_deref(), Some("c2"));
    }

    #[test]
    fn hide_class_drops_matching_messages() {
        let out = HideClass::new([VisibilityClass::Notification]).apply(transcript());
        assert!(out.iter().all(|m| m.content != "second"));
        assert_eq!(out.len(), transcript().len() - 1);
    }

    #[test]
    fn token_budget_always_keeps_system_prompt() {
        let out = TokenBudget::new(10).apply(transcript());
        assert!(out.iter().any(|m| m.role == Role::System));
        assert!(out.len() < transcript().len());
    }

    #[test]
    fn composed_applies_in_order() {
        let chain = Composed::new(vec![
            Arc::new(HideClass::new([VisibilityClass::Notification])),
            Arc::new(LimitToolResults::new(1)),
        ]);
        let out = chain.apply(transcript());
        assert!(out.iter().all(|m| m.content != "second"));
        assert_eq!(out.iter().filter(|m| m.role == Role::Tool).count(), 1);
    }

    #[test]
    fn filters_never_mutate_the_store() {
        let store = SessionStore::new();
        for message in transcript() {
            store.append("a", message);
        }
        let before = store.history("a");
        let _ = TokenBudget::new(5).apply(before.clone());
        assert_eq!(store.history("a"), before);
    }
}
