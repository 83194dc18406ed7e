use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, ITEM_COMMANDS, ITEM_TEXT_COMMANDS, LIST_ARG_COMMANDS, NO_ARG_COMMANDS,
    RAW_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    /// 1-based item position, when the command carried a valid one.
    pub fn item_position(&self) -> Option<usize> {
        self.command_args
            .get("item")
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
            .filter(|value| *value > 0)
    }

    pub fn text_arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_list_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    parts
        .into_iter()
        .flat_map(|part| {
            part.split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect::<Vec<String>>()
        })
        .collect()
}

fn split_item_arg(arg: &str) -> (Value, &str) {
    let trimmed = arg.trim_start();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return (Value::Null, trimmed);
    }
    let position = trimmed[..digits]
        .parse::<u64>()
        .map(|value| Value::Number(value.into()))
        .unwrap_or(Value::Null);
    (position, trimmed[digits..].trim())
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "set_platform" {
                    "platform"
                } else {
                    "size"
                };
                return Intent::new(action, text).with_arg(key, Value::String(arg.to_string()));
            }

            if let Some(action) = find_action(&command, LIST_ARG_COMMANDS) {
                let sizes = parse_list_args(arg)
                    .into_iter()
                    .map(Value::String)
                    .collect();
                return Intent::new(action, text).with_arg("sizes", Value::Array(sizes));
            }

            if let Some(action) = find_action(&command, ITEM_COMMANDS) {
                let (position, _) = split_item_arg(arg);
                return Intent::new(action, text).with_arg("item", position);
            }

            if let Some(action) = find_action(&command, ITEM_TEXT_COMMANDS) {
                let (position, rest) = split_item_arg(arg);
                return Intent::new(action, text)
                    .with_arg("item", position)
                    .with_arg("instruction", Value::String(rest.to_string()));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_a_brief() {
        let intent = parse_intent("  Summer sale, bold red, 30% off  ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("Summer sale, bold red, 30% off"));
    }

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_platform_keeps_spaces() {
        let intent = parse_intent("/platform Google Ads");
        assert_eq!(intent.action, "set_platform");
        assert_eq!(intent.text_arg("platform"), Some("Google Ads"));
    }

    #[test]
    fn parse_sizes_quoted_and_comma_lists() {
        let quoted = parse_intent("/sizes \"Medium Rectangle\" Leaderboard");
        assert_eq!(quoted.action, "set_sizes");
        assert_eq!(
            quoted.command_args["sizes"],
            json!(["Medium Rectangle", "Leaderboard"])
        );

        let commas = parse_intent("/sizes Square,Story");
        assert_eq!(commas.command_args["sizes"], json!(["Square", "Story"]));
    }

    #[test]
    fn parse_edit_position_and_instruction() {
        let intent = parse_intent("/edit 2 make the headline larger");
        assert_eq!(intent.action, "edit");
        assert_eq!(intent.item_position(), Some(2));
        assert_eq!(intent.text_arg("instruction"), Some("make the headline larger"));
    }

    #[test]
    fn parse_edit_without_position() {
        let intent = parse_intent("/edit make it blue");
        assert_eq!(intent.item_position(), None);
        assert_eq!(intent.text_arg("instruction"), Some("make it blue"));
    }

    #[test]
    fn parse_item_commands() {
        assert_eq!(parse_intent("/download 3").item_position(), Some(3));
        assert_eq!(parse_intent("/preview 1").action, "retry_preview");
        assert_eq!(parse_intent("/cancel 1").action, "cancel_edit");
        assert_eq!(parse_intent("/show 0").item_position(), None);
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/clear").action, "clear_history");
        assert_eq!(parse_intent("/wait").action, "wait_previews");
        assert_eq!(parse_intent("/HISTORY").action, "history");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
