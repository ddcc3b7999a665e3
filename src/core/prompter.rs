//! Interaction port for user input.
//!
//! All blocking reads go through this trait so the turn state machine stays
//! free of device I/O and can be driven by scripted inputs in tests.

use async_trait::async_trait;
use std::io::Write;

#[async_trait]
pub trait Prompter: Send {
    /// Reads the next line of user input. `None` signals end of input.
    async fn next_line(&mut self, prompt: &str) -> Option<String>;

    /// Pushes an informational line to the user.
    fn notify(&mut self, text: &str);
}

/// Reads from stdin on a blocking worker thread.
#[derive(Default)]
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn next_line(&mut self, prompt: &str) -> Option<String> {
        let prompt = prompt.to_string();
        let line = tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line),
                Err(_) => None,
            }
        })
        .await
        .ok()
        .flatten()?;
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn notify(&mut self, text: &str) {
        println!("{text}");
    }
}

#[cfg(test)]
pub struct ScriptedPrompter {
    inputs: std::collections::VecDeque<String>,
    pub notices: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn new<I: IntoIterator<Item = &'static str>>(inputs: I) -> Self {
        Self {
            inputs: inputs.into_iter().map(str::to_string).collect(),
            notices: Vec::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn next_line(&mut self, _prompt: &str) -> Option<String> {
        self.inputs.pop_front()
    }

    fn notify(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}
