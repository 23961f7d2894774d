//! Model-provider port: token-streaming tool-use calls with an injected tool
//! schema. The Anthropic implementation talks SSE over reqwest; tests use the
//! scripted provider from [`testing`].

pub mod anthropic;
pub mod anthropic_stream;
pub mod provider;
pub mod stream;
pub mod testing;
pub mod tokens;

pub use anthropic::AnthropicProvider;
pub use provider::{
    ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role, ToolCall, ToolChoice,
    ToolDefinition,
};
pub use stream::StreamEvent;
pub use tokens::estimate_tokens;
