//! Command parsing.
//!
//! A command is message text of the form `<prefix><name>[@mention] [args...]`.
//! Names are case-folded. A mention addressed to a different bot means the
//! message is not a command for us.

use crate::event::{Event, UpdateKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Case-folded name without prefix or mention.
    pub name: String,
    pub mention: Option<String>,
    pub args: Vec<String>,
    /// Everything after the command token, trimmed.
    pub raw_args: String,
}

#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: char,
    bot_username: Option<String>,
}

impl CommandParser {
    pub fn new(prefix: char) -> Self {
        Self {
            prefix,
            bot_username: None,
        }
    }

    pub fn with_bot_username(mut self, username: Option<&str>) -> Self {
        self.bot_username = username
            .map(|u| u.trim_start_matches('@').to_lowercase())
            .filter(|u| !u.is_empty());
        self
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let rest = text.trim_start().strip_prefix(self.prefix)?;
        let (token, tail) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim()),
            None => (rest, ""),
        };
        let (name, mention) = match token.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (token, None),
        };
        if name.is_empty() {
            return None;
        }
        if let (Some(mention), Some(bot)) = (mention, &self.bot_username) {
            if !mention.eq_ignore_ascii_case(bot) {
                return None;
            }
        }

        Some(ParsedCommand {
            name: name.to_lowercase(),
            mention: mention.map(str::to_lowercase),
            args: tail.split_whitespace().map(str::to_owned).collect(),
            raw_args: tail.to_string(),
        })
    }

    /// Parse the text of a new message. Edits and other updates never carry commands.
    pub fn parse_event(&self, event: &Event) -> Option<ParsedCommand> {
        if event.update_kind() != UpdateKind::Message {
            return None;
        }
        self.parse(event.text()?)
    }

    /// Registration key for `name`: prefix stripped, case-folded.
    pub fn normalize(&self, name: &str) -> String {
        name.trim()
            .trim_start_matches(self.prefix)
            .to_lowercase()
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_args() {
        let parser = CommandParser::default();
        let cmd = parser.parse("/Start  ref-42  extra").unwrap();
        assert_eq!(cmd.name, "start");
        assert_eq!(cmd.args, vec!["ref-42", "extra"]);
        assert_eq!(cmd.raw_args, "ref-42  extra");
        assert!(cmd.mention.is_none());
    }

    #[test]
    fn plain_text_is_not_a_command() {
        let parser = CommandParser::default();
        assert!(parser.parse("hello /start").is_none());
        assert!(parser.parse("/").is_none());
        assert!(parser.parse("/ start").is_none());
    }

    #[test]
    fn mention_must_name_this_bot() {
        let parser = CommandParser::default().with_bot_username(Some("@HelperBot"));
        assert_eq!(parser.parse("/help@helperbot").unwrap().name, "help");
        assert!(parser.parse("/help@otherbot").is_none());

        let anonymous = CommandParser::default();
        assert_eq!(anonymous.parse("/help@otherbot").unwrap().name, "help");
    }

    #[test]
    fn custom_prefix() {
        let parser = CommandParser::new('!');
        assert_eq!(parser.parse("!ban 12").unwrap().args, vec!["12"]);
        assert!(parser.parse("/ban 12").is_none());
        assert_eq!(parser.normalize("!BAN"), "ban");
    }
}
