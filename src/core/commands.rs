//! Parsing for the administrative command surface and the forced-tool
//! directive. Commands are case-insensitive; server and tool names keep
//! their original casing.

/// Prefix that forces a named tool on the next model request.
pub const DIRECTIVE_SIGIL: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Empty,
    Exit,
    Reset,
    ToolsReset,
    ToolsList,
    ToolsDescribe(String),
    ToolsEnable(String),
    ToolsDisable(String),
    Directive { tool: String, message: String },
    Chat(String),
}

pub fn parse_input(input: &str) -> InputAction {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return InputAction::Empty;
    }

    if let Some(rest) = trimmed.strip_prefix(DIRECTIVE_SIGIL) {
        let rest = rest.trim_start();
        let mut parts = rest.splitn(2, char::is_whitespace);
        let tool = parts.next().unwrap_or("").to_string();
        if tool.is_empty() {
            return InputAction::Empty;
        }
        let message = parts.next().unwrap_or("").trim().to_string();
        return InputAction::Directive { tool, message };
    }

    let lower = trimmed.to_lowercase();
    match lower.as_str() {
        "exit" | "quit" => return InputAction::Exit,
        "reset" => return InputAction::Reset,
        "tools reset" => return InputAction::ToolsReset,
        "tools" => return InputAction::ToolsList,
        _ => {}
    }

    for (prefix, build) in [
        ("tools disable ", InputAction::ToolsDisable as fn(String) -> InputAction),
        ("tools enable ", InputAction::ToolsEnable as fn(String) -> InputAction),
        ("tools describe ", InputAction::ToolsDescribe as fn(String) -> InputAction),
    ] {
        if lower.starts_with(prefix) {
            let name = trimmed[prefix.len()..].trim().to_string();
            return build(name);
        }
    }

    InputAction::Chat(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_input("EXIT"), InputAction::Exit);
        assert_eq!(parse_input("Quit"), InputAction::Exit);
        assert_eq!(parse_input("Reset"), InputAction::Reset);
        assert_eq!(parse_input("Tools Reset"), InputAction::ToolsReset);
        assert_eq!(parse_input("TOOLS"), InputAction::ToolsList);
    }

    #[test]
    fn server_names_keep_their_casing() {
        assert_eq!(
            parse_input("tools disable MyServer"),
            InputAction::ToolsDisable("MyServer".to_string())
        );
        assert_eq!(
            parse_input("TOOLS ENABLE MyServer"),
            InputAction::ToolsEnable("MyServer".to_string())
        );
        assert_eq!(
            parse_input("tools describe Files"),
            InputAction::ToolsDescribe("Files".to_string())
        );
    }

    #[test]
    fn directive_splits_tool_and_message() {
        assert_eq!(
            parse_input("#lookup find it"),
            InputAction::Directive {
                tool: "lookup".to_string(),
                message: "find it".to_string()
            }
        );
        assert_eq!(
            parse_input("#lookup"),
            InputAction::Directive {
                tool: "lookup".to_string(),
                message: String::new()
            }
        );
        assert_eq!(parse_input("#"), InputAction::Empty);
    }

    #[test]
    fn anything_else_is_chat() {
        assert_eq!(
            parse_input("  hello there  "),
            InputAction::Chat("hello there".to_string())
        );
        assert_eq!(parse_input("   "), InputAction::Empty);
    }
}
