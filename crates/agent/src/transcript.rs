use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::CapabilityCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One role-tagged message of the provider's context window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    pub content: String,
    /// Calls requested by an assistant entry, in the order the provider returned them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CapabilityCall>,
    /// Set on tool entries so the provider can pair a result with its call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Entry {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>, calls: Vec<CapabilityCall>) -> Self {
        Self { calls, ..Self::plain(Role::Assistant, content.into()) }
    }

    pub fn tool_result(call: &CapabilityCall, result: &Value) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            ..Self::plain(Role::Tool, result.to_string())
        }
    }

    /// Result of a call parsed out of prose; there is no provider call id to answer.
    pub fn text_tool_result(name: &str, result: &Value) -> Self {
        Self { name: Some(name.to_string()), ..Self::plain(Role::Tool, result.to_string()) }
    }

    fn plain(role: Role, content: String) -> Self {
        Self { role, content, calls: Vec::new(), tool_call_id: None, name: None }
    }
}

/// Append-only message log whose first entry is always the system instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Transcript {
    entries: Vec<Entry>,
}

impl Transcript {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self { entries: vec![Entry::system(system_instruction)] }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn system_instruction(&self) -> &str {
        self.entries.first().map(|entry| entry.content.as_str()).unwrap_or_default()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.entries.iter().filter(|entry| entry.role == role).count()
    }

    /// Drops everything but the leading system instruction.
    pub fn reset(&mut self) {
        self.entries.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Entry, Role, Transcript};
    use crate::llm::CapabilityCall;

    #[test]
    fn reset_keeps_only_the_system_instruction() {
        let mut transcript = Transcript::new("You are a care coordinator.");
        transcript.push(Entry::user("book ortho"));
        transcript.push(Entry::assistant("Which provider?", Vec::new()));

        transcript.reset();

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].role, Role::System);
        assert_eq!(transcript.system_instruction(), "You are a care coordinator.");
    }

    #[test]
    fn tool_results_carry_the_call_id() {
        let call = CapabilityCall::new("call_7", "get_self_pay_rate", json!({"specialty": "Surgery"}));
        let entry = Entry::tool_result(&call, &json!({"found": true, "rate": "1000"}));

        assert_eq!(entry.role, Role::Tool);
        assert_eq!(entry.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(entry.name.as_deref(), Some("get_self_pay_rate"));
        assert_eq!(entry.content, r#"{"found":true,"rate":"1000"}"#);
    }
}
