//! Per-server enable/disable policy consulted when offering tools to the
//! model and when validating forced directives.

use crate::mcp::pool::{SessionPool, ToolDefinition};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ServerEnablement {
    disabled: HashSet<String>,
}

impl ServerEnablement {
    /// Disables every tool on the named server. The name must own at least
    /// one live session.
    pub fn disable(&mut self, server_name: &str, pool: &SessionPool) -> Result<(), String> {
        if !pool.has_server(server_name) {
            return Err(format!("No such server: {}", server_name));
        }
        self.disabled.insert(server_name.to_string());
        Ok(())
    }

    pub fn enable(&mut self, server_name: &str, pool: &SessionPool) -> Result<(), String> {
        if !pool.has_server(server_name) {
            return Err(format!("No such server: {}", server_name));
        }
        self.disabled.remove(server_name);
        Ok(())
    }

    pub fn is_disabled(&self, server_name: &str) -> bool {
        self.disabled.contains(server_name)
    }

    /// Subset of definitions whose owning server is enabled; this is the
    /// schema list offered on each completion request.
    pub fn filter_tools<'a>(&self, defs: &'a [ToolDefinition]) -> Vec<&'a ToolDefinition> {
        defs.iter()
            .filter(|def| !self.disabled.contains(&def.server))
            .collect()
    }

    /// Whether a dispatchable tool's owning server is enabled. Unknown
    /// tools are not allowed.
    pub fn is_allowed(&self, tool_name: &str, pool: &SessionPool) -> bool {
        pool.tool_server(tool_name)
            .is_some_and(|server| !self.disabled.contains(server))
    }

    /// Cleared on full reconnect, never on a plain history reset.
    pub fn clear(&mut self) {
        self.disabled.clear();
    }
}
