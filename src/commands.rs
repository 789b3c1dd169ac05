//! Command and trigger parsing
//!
//! - `!xxx` = bot commands (`chat`, `clear`, `usage`, `hello`, `help`)
//! - anything else addressed to the bot (mention or name) = a chat prompt

use regex::Regex;
use std::fmt;

/// Text used when a mention carries no other content
pub const EMPTY_PROMPT: &str = "Hello";

/// Commands handled by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Explicit prompt
    Chat,
    /// Reset the channel history
    Clear,
    /// Admin-only usage report
    Usage,
    /// Greeting
    Hello,
    /// List the commands
    Help,
}

impl BotCommand {
    pub fn all() -> &'static [BotCommand] {
        &[
            BotCommand::Chat,
            BotCommand::Clear,
            BotCommand::Usage,
            BotCommand::Hello,
            BotCommand::Help,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Chat => "chat",
            BotCommand::Clear => "clear",
            BotCommand::Usage => "usage",
            BotCommand::Hello => "hello",
            BotCommand::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BotCommand::Chat => "Chat with Arnoldii",
            BotCommand::Clear => "Clear the conversation history for this channel",
            BotCommand::Usage => "Check the current DeepSeek API usage",
            BotCommand::Hello => "Check that the bot is working",
            BotCommand::Help => "Show this list",
        }
    }

    pub fn takes_args(&self) -> bool {
        matches!(self, BotCommand::Chat)
    }

    pub fn admin_only(&self) -> bool {
        matches!(self, BotCommand::Usage)
    }

    pub fn parse(name: &str) -> Option<BotCommand> {
        let name = name.to_lowercase();
        Self::all().iter().find(|cmd| cmd.name() == name).copied()
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Parsed command result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Known command with its (trimmed) argument text
    Known(BotCommand, String),
    /// Prefixed, but not a command we handle
    Unknown(String),
}

/// Parse a message as a command. `None` if it does not start with `prefix`.
pub fn parse_command(input: &str, prefix: &str) -> Option<ParsedCommand> {
    let rest = input.trim_start().strip_prefix(prefix)?;
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map(|(name, args)| (name, args.trim()))
        .unwrap_or((rest.trim_end(), ""));

    match BotCommand::parse(name) {
        Some(cmd) => Some(ParsedCommand::Known(cmd, args.to_string())),
        None => Some(ParsedCommand::Unknown(name.to_string())),
    }
}

/// One line per command, for help output
pub fn help_text(prefix: &str) -> String {
    BotCommand::all()
        .iter()
        .map(|cmd| {
            let usage = if cmd.takes_args() {
                format!("{prefix}{} <message>", cmd.name())
            } else {
                format!("{prefix}{}", cmd.name())
            };
            format!("`{usage}` - {}", cmd.description())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decides whether a plain message is addressed to the bot and extracts the prompt
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    bot_names: Vec<String>,
    mention: Option<Regex>,
}

impl TriggerDetector {
    pub fn new(bot_names: &[String]) -> Self {
        Self {
            bot_names: bot_names
                .iter()
                .map(|n| n.to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
            mention: None,
        }
    }

    /// Enable stripping of `<@id>` / `<@!id>` mentions of the bot
    pub fn with_bot_id(mut self, bot_id: u64) -> Self {
        self.mention = Regex::new(&format!(r"<@!?{bot_id}>")).ok();
        self
    }

    /// Whether any name variant appears in the text (case-insensitive)
    pub fn is_called(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.bot_names.iter().any(|name| lowered.contains(name.as_str()))
    }

    /// Whether the message should get a reply
    pub fn is_triggered(&self, content: &str, mentioned: bool) -> bool {
        mentioned || self.is_called(content)
    }

    /// The prompt to send: mentions stripped when the bot was mentioned,
    /// and a greeting if nothing is left.
    pub fn prompt_text(&self, content: &str, mentioned: bool) -> String {
        let text = match (&self.mention, mentioned) {
            (Some(re), true) => re.replace_all(content, "").trim().to_string(),
            _ => content.trim().to_string(),
        };
        if text.is_empty() {
            EMPTY_PROMPT.to_string()
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["arnoldii".to_string(), "arnold".to_string()]
    }

    #[test]
    fn test_parse_command() {
        match parse_command("!clear", "!") {
            Some(ParsedCommand::Known(BotCommand::Clear, args)) => assert!(args.is_empty()),
            other => panic!("Should parse as clear, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_command_with_args() {
        match parse_command("!chat   What is Rust?  ", "!") {
            Some(ParsedCommand::Known(BotCommand::Chat, args)) => {
                assert_eq!(args, "What is Rust?");
            }
            other => panic!("Should parse with args, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_command_case_insensitive() {
        assert_eq!(
            parse_command("!USAGE", "!"),
            Some(ParsedCommand::Known(BotCommand::Usage, String::new()))
        );
    }

    #[test]
    fn test_parse_unknown_and_plain() {
        assert_eq!(
            parse_command("!dance now", "!"),
            Some(ParsedCommand::Unknown("dance".to_string()))
        );
        assert_eq!(parse_command("hello arnold", "!"), None);
    }

    #[test]
    fn test_custom_prefix() {
        assert_eq!(
            parse_command("?hello", "?"),
            Some(ParsedCommand::Known(BotCommand::Hello, String::new()))
        );
        assert_eq!(parse_command("!hello", "?"), None);
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text("!");
        for cmd in BotCommand::all() {
            assert!(help.contains(&format!("!{}", cmd.name())));
        }
        assert!(help.contains("!chat <message>"));
        assert!(help.contains("`!help` - Show this list"));
    }

    #[test]
    fn test_parse_help() {
        assert_eq!(
            parse_command("!help", "!"),
            Some(ParsedCommand::Known(BotCommand::Help, String::new()))
        );
        assert!(!BotCommand::Help.admin_only());
    }

    #[test]
    fn test_called_by_name() {
        let detector = TriggerDetector::new(&names());
        assert!(detector.is_called("Hey ARNOLD, what's up?"));
        assert!(detector.is_called("arnoldii help"));
        assert!(!detector.is_called("hello everyone"));
        assert!(detector.is_triggered("hello", true));
        assert!(!detector.is_triggered("hello", false));
    }

    #[test]
    fn test_prompt_strips_mentions() {
        let detector = TriggerDetector::new(&names()).with_bot_id(1234);
        assert_eq!(
            detector.prompt_text("<@1234> what is 2+2?", true),
            "what is 2+2?"
        );
        assert_eq!(detector.prompt_text("<@!1234>", true), EMPTY_PROMPT);
        // Other users' mentions stay
        assert_eq!(detector.prompt_text("<@999> hi <@1234>", true), "<@999> hi");
    }

    #[test]
    fn test_prompt_without_mention_kept_verbatim() {
        let detector = TriggerDetector::new(&names()).with_bot_id(1234);
        assert_eq!(
            detector.prompt_text("  arnold, <@1234> tell me  ", false),
            "arnold, <@1234> tell me"
        );
    }
}
