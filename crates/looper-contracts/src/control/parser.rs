use std::path::PathBuf;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};
use super::ControlSignal;

/// What a single line typed by the controller asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Noop,
    /// Signals to enqueue, in order.
    Signals(Vec<ControlSignal>),
    Status,
    Help,
    Quit,
    Unknown { command: String, hint: String },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn unknown(command: &str, hint: &str) -> ControlCommand {
    ControlCommand::Unknown {
        command: command.to_string(),
        hint: hint.to_string(),
    }
}

/// Parse one controller line such as `/pause` or `/image "/tmp/a b.png"`.
pub fn parse_control_line(text: &str) -> ControlCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ControlCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return unknown(raw_trimmed, "commands start with '/'; try /help");
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return unknown(raw_trimmed, "try /help");
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return match action {
            "pause" => ControlCommand::Signals(vec![ControlSignal::Pause]),
            "status" => ControlCommand::Status,
            "help" => ControlCommand::Help,
            _ => ControlCommand::Quit,
        };
    }

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        if action == "resume" {
            let mut signals = Vec::new();
            if !arg.is_empty() {
                signals.push(ControlSignal::SetPrompt(arg.to_string()));
            }
            signals.push(ControlSignal::Resume);
            return ControlCommand::Signals(signals);
        }
        if arg.is_empty() {
            return unknown(&command, "usage: /prompt <text>");
        }
        return ControlCommand::Signals(vec![ControlSignal::SetPrompt(arg.to_string())]);
    }

    if find_action(&command, SINGLE_PATH_COMMANDS).is_some() {
        let path = parse_single_path_arg(arg);
        if path.is_empty() {
            return unknown(&command, "usage: /image <path>");
        }
        return ControlCommand::Signals(vec![ControlSignal::SetImage(PathBuf::from(path))]);
    }

    unknown(&command, "try /help")
}
