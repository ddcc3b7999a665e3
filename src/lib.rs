//! Palaver is a terminal chat client that bridges an Azure OpenAI deployment
//! to MCP tool servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns configuration, command parsing, the conversation engine,
//!   and the tool-invocation policy (approval and result serialization).
//! - [`mcp`] provides Model Context Protocol integration: the transports,
//!   the session pool with its shared tool registry, and the per-server
//!   enablement policy.
//! - [`api`] defines the chat-completion payloads and the endpoint client.
//! - [`app`] runs the interactive loop and the single-shot batch path.
//!
//! The binary entrypoint (`src/main.rs`) loads configuration, connects the
//! configured servers, and dispatches into [`app::App`].

pub mod api;
pub mod app;
pub mod core;
pub mod mcp;
pub mod transcript;
