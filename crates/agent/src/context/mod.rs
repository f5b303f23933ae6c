//! Conversation-window management.
//!
//! - [`compactor`]: replaces stale tool responses with a placeholder
//! - [`token`]: rough token estimates used for the context-limit check

pub mod compactor;
pub mod token;

pub use compactor::{compact, OMITTED_TOOL_RESPONSE};
pub use token::{estimate_messages_tokens, estimate_tokens, estimate_tools_tokens};
