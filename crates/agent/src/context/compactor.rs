//! Tool-history compaction.
//!
//! Long research rollouts accumulate large tool responses (search result
//! pages, fetched documents). Before each model turn the loop driver
//! replaces the bodies of all but the newest `keep_rounds` tool messages
//! with a fixed placeholder. Message count, order, roles, call ids and
//! every non-tool message are left exactly as they were.

use deepreact_core::message::Conversation;
use tracing::debug;

/// Body written over compacted tool responses.
pub const OMITTED_TOOL_RESPONSE: &str = "[tool response omitted]";

/// Compact `conversation`, keeping the newest `keep_rounds` tool responses.
///
/// `keep_rounds == 0` disables compaction. Idempotent for a fixed
/// `keep_rounds`.
pub fn compact(mut conversation: Conversation, keep_rounds: usize) -> Conversation {
    if keep_rounds == 0 {
        return conversation;
    }

    let tool_indices = conversation.tool_message_indices();
    if tool_indices.len() <= keep_rounds {
        return conversation;
    }

    let stale = tool_indices.len() - keep_rounds;
    let mut rewritten = 0usize;
    for &index in &tool_indices[..stale] {
        let message = &mut conversation.messages[index];
        if message.content != OMITTED_TOOL_RESPONSE {
            message.content = OMITTED_TOOL_RESPONSE.to_string();
            rewritten += 1;
        }
    }

    if rewritten > 0 {
        debug!(rewritten, kept = keep_rounds, "Compacted tool history");
    }
    conversation
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepreact_core::message::{Message, Role};

    fn conversation_with_tools(n: usize) -> Conversation {
        let mut conv = Conversation::seeded("system", "question");
        for i in 0..n {
            conv.push(Message::assistant(format!("thinking {i}")));
            conv.push(Message::tool_result(format!("call_{i}"), format!("result {i}")).with_error(i == 0));
        }
        conv
    }

    #[test]
    fn zero_keep_is_identity() {
        let conv = conversation_with_tools(4);
        let expected = conv.messages.clone();
        let out = compact(conv, 0);
        assert_eq!(out.messages, expected);
    }

    #[test]
    fn within_budget_is_unchanged() {
        let conv = conversation_with_tools(2);
        let expected = conv.messages.clone();
        assert_eq!(compact(conv, 2).messages, expected);
    }

    #[test]
    fn keeps_newest_tool_messages() {
        let conv = conversation_with_tools(4);
        let before = conv.messages.clone();
        let out = compact(conv, 1);

        assert_eq!(out.len(), before.len());
        let tool: Vec<&Message> = out.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool.len(), 4);
        for m in &tool[..3] {
            assert_eq!(m.content, OMITTED_TOOL_RESPONSE);
        }
        assert_eq!(tool[3].content, "result 3");

        // Everything except the rewritten bodies is untouched.
        for (a, b) in out.messages.iter().zip(&before) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.role, b.role);
            assert_eq!(a.tool_call_id, b.tool_call_id);
            assert_eq!(a.is_error, b.is_error);
            if a.role != Role::Tool {
                assert_eq!(a.content, b.content);
            }
        }
    }

    #[test]
    fn compaction_is_idempotent() {
        let once = compact(conversation_with_tools(5), 2);
        let snapshot = once.messages.clone();
        let twice = compact(once, 2);
        assert_eq!(twice.messages, snapshot);
    }

    #[test]
    fn conversation_without_tools() {
        let conv = Conversation::seeded("s", "q");
        let out = compact(conv, 1);
        assert_eq!(out.len(), 2);
    }
}
