//! Interactive session loop: reads lines, routes administrative commands,
//! and hands chat input to the conversation engine.

use crate::api::client::CompletionBackend;
use crate::core::commands::{parse_input, InputAction};
use crate::core::config::io::{self, load_server_configs};
use crate::core::conversation::{ConversationEngine, TurnContext};
use crate::core::prompter::Prompter;
use crate::mcp::enablement::ServerEnablement;
use crate::mcp::pool::SessionPool;
use crate::transcript::Transcript;
use std::path::PathBuf;
use tracing::warn;

const INPUT_PROMPT: &str = "> ";

pub struct App {
    pub engine: ConversationEngine,
    pub pool: SessionPool,
    pub enablement: ServerEnablement,
    pub transcript: Transcript,
    pub config_dir: PathBuf,
}

impl App {
    /// Runs until the user exits, interrupts with Ctrl-C, or input ends.
    pub async fn run_interactive(
        &mut self,
        backend: &dyn CompletionBackend,
        prompter: &mut dyn Prompter,
    ) {
        // One long-lived listener: an interrupt delivered mid-turn is still
        // observed when the loop next polls for input.
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            let line = tokio::select! {
                _ = &mut ctrl_c => {
                    prompter.notify("");
                    break;
                }
                line = prompter.next_line(INPUT_PROMPT) => line,
            };
            let Some(line) = line else {
                break;
            };

            match parse_input(&line) {
                InputAction::Empty => {}
                InputAction::Exit => break,
                InputAction::Reset => {
                    self.engine.reset(&mut self.transcript);
                    prompter.notify("History reset.");
                }
                InputAction::ToolsReset => self.reconnect_servers(prompter).await,
                InputAction::ToolsList => self.list_tools(prompter),
                InputAction::ToolsDescribe(server) => self.describe_server(&server, prompter),
                InputAction::ToolsEnable(server) => {
                    match self.enablement.enable(&server, &self.pool) {
                        Ok(()) => prompter.notify(&format!("Enabled server '{}'", server)),
                        Err(err) => prompter.notify(&err),
                    }
                }
                InputAction::ToolsDisable(server) => {
                    match self.enablement.disable(&server, &self.pool) {
                        Ok(()) => prompter.notify(&format!("Disabled server '{}'", server)),
                        Err(err) => prompter.notify(&err),
                    }
                }
                InputAction::Directive { tool, message } => {
                    if let Err(err) =
                        ConversationEngine::validate_directive(&tool, &self.pool, &self.enablement)
                    {
                        prompter.notify(&err);
                        continue;
                    }
                    let answer = self
                        .turn(&message, Some(tool), backend, prompter)
                        .await;
                    prompter.notify(&answer);
                }
                InputAction::Chat(message) => {
                    let answer = self.turn(&message, None, backend, prompter).await;
                    prompter.notify(&answer);
                }
            }
        }
    }

    /// Single-shot run: one turn with every call auto-approved, printing
    /// only the final assistant text.
    pub async fn run_batch(
        &mut self,
        prompt: &str,
        backend: &dyn CompletionBackend,
        prompter: &mut dyn Prompter,
    ) -> String {
        match parse_input(prompt) {
            InputAction::Directive { tool, message } => {
                if let Err(err) =
                    ConversationEngine::validate_directive(&tool, &self.pool, &self.enablement)
                {
                    return err;
                }
                self.turn(&message, Some(tool), backend, prompter).await
            }
            _ => self.turn(prompt, None, backend, prompter).await,
        }
    }

    async fn turn(
        &mut self,
        message: &str,
        forced: Option<String>,
        backend: &dyn CompletionBackend,
        prompter: &mut dyn Prompter,
    ) -> String {
        let mut ctx = TurnContext {
            pool: &mut self.pool,
            enablement: &self.enablement,
            backend,
            prompter,
            transcript: &mut self.transcript,
        };
        self.engine.run_turn(message, forced, &mut ctx).await
    }

    /// Rereads the server file, rebuilds every session, and lifts all
    /// disablement. The conversation history is untouched.
    async fn reconnect_servers(&mut self, prompter: &mut dyn Prompter) {
        let path = io::servers_path(&self.config_dir);
        let descriptors = match load_server_configs(&path) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                warn!(error = %err, "Could not reload server configuration");
                prompter.notify(&format!("{}", err));
                return;
            }
        };
        self.pool.full_reconnect(descriptors).await;
        self.enablement.clear();
        prompter.notify(&format!(
            "Reconnected. {} tool(s) available.",
            self.pool.function_defs().len()
        ));
    }

    fn list_tools(&self, prompter: &mut dyn Prompter) {
        let servers = self.pool.server_names();
        if servers.is_empty() {
            prompter.notify("No MCP servers connected.");
            return;
        }
        for server in servers {
            let status = if self.enablement.is_disabled(server) {
                "disabled"
            } else {
                "enabled"
            };
            prompter.notify(&format!("{} [{}]", server, status));
            for def in self
                .pool
                .function_defs()
                .iter()
                .filter(|def| def.server == server)
            {
                prompter.notify(&format!("  {}", def.name));
            }
        }
    }

    /// Shows the server's own catalogue, including names that lost the
    /// shared-namespace race and are not dispatchable.
    fn describe_server(&self, server: &str, prompter: &mut dyn Prompter) {
        let tools = self.pool.tools_for_server(server);
        if tools.is_empty() {
            prompter.notify(&format!("No tools found for server '{}'", server));
            return;
        }
        for tool in tools {
            let description = tool.description.clone().unwrap_or_default();
            if description.is_empty() {
                prompter.notify(&tool.name.to_string());
            } else {
                prompter.notify(&format!("{}: {}", tool.name, description));
            }
        }
    }
}
