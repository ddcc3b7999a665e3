pub mod commands;
pub mod config;
pub mod conversation;
pub mod invocation;
pub mod prompter;
