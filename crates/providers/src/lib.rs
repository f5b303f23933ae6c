//! Model-completion backends for DeepReact.
//!
//! All providers implement the `deepreact_core::Provider` trait.
//! `build_from_config` selects one of them at startup.

mod http;
pub mod openai_compat;
pub mod router;
pub mod text_completion;

#[cfg(test)]
pub(crate) mod test_server;

pub use http::classify_status;
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_from_config;
pub use text_completion::TextCompletionProvider;
