//! Terminal HITL handler: prompts on stderr, reads answers from stdin.

use async_trait::async_trait;
use serde_json::Value;

use tactus_contract::hitl::{HitlHandler, HitlKind, HitlOutcome, HitlRequest};

/// Interactive handler for CLI runs outside mock mode.
pub struct TerminalHitlHandler;

impl TerminalHitlHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalHitlHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_line_blocking(prompt: String) -> Option<String> {
    eprint!("{prompt}");
    let mut answer = String::new();
    match std::io::stdin().read_line(&mut answer) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(answer.trim().to_string()),
    }
}

#[async_trait]
impl HitlHandler for TerminalHitlHandler {
    async fn request(&self, request: &HitlRequest) -> HitlOutcome {
        let prompt = match request.kind {
            HitlKind::Approve => format!("{} [y/N]: ", request.message),
            HitlKind::Input => format!("{}: ", request.message),
            HitlKind::Review => {
                if let Some(context) = &request.context {
                    eprintln!("--- review ---\n{context}\n--------------");
                }
                format!("{} [y/N]: ", request.message)
            }
        };

        // Stdin is blocking; keep it off the async workers.
        let kind = request.kind;
        let answer = tokio::task::spawn_blocking(move || read_line_blocking(prompt))
            .await
            .ok()
            .flatten();

        let Some(answer) = answer else {
            return HitlOutcome::Cancelled;
        };
        let value = match kind {
            HitlKind::Approve | HitlKind::Review => {
                Value::Bool(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
            }
            HitlKind::Input => {
                serde_json::from_str(&answer).unwrap_or_else(|_| Value::String(answer))
            }
        };
        HitlOutcome::Resolved { value }
    }
}
