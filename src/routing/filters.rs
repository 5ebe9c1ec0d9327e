//! Built-in filter leaves.

use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use super::command::CommandParser;
use super::filter::Filter;
use super::regex_cache::RegexCache;
use crate::event::{ChatKind, Event, EventKind, MediaKind, UpdateKind};

/// Events of the given update kind.
pub fn kind(kind: UpdateKind) -> Filter {
    Filter::leaf(format!("kind:{kind}"), move |e: &Event| e.update_kind() == kind)
}

/// New or edited messages carrying text.
pub fn text() -> Filter {
    Filter::leaf("text", |e: &Event| e.text().is_some())
}

pub fn caption() -> Filter {
    Filter::leaf("caption", |e: &Event| e.caption().is_some())
}

pub fn private() -> Filter {
    chat_kind("private", &[ChatKind::Private])
}

pub fn group() -> Filter {
    chat_kind("group", &[ChatKind::Group, ChatKind::Supergroup])
}

pub fn channel() -> Filter {
    chat_kind("channel", &[ChatKind::Channel])
}

fn chat_kind(name: &'static str, kinds: &'static [ChatKind]) -> Filter {
    Filter::leaf(name, move |e: &Event| {
        e.chat().is_some_and(|c| kinds.contains(&c.kind))
    })
}

pub fn forwarded() -> Filter {
    Filter::leaf("forwarded", |e: &Event| e.message().is_some_and(|m| m.forwarded))
}

pub fn reply() -> Filter {
    Filter::leaf("reply", |e: &Event| {
        e.message().is_some_and(|m| m.reply_to_message_id.is_some())
    })
}

/// Messages carrying any media.
pub fn media() -> Filter {
    Filter::leaf("media", |e: &Event| text_message(e).is_some_and(|m| m.media.is_some()))
}

pub fn media_kind(kind: MediaKind) -> Filter {
    Filter::leaf(format!("media:{kind:?}"), move |e: &Event| {
        text_message(e).is_some_and(|m| m.media == Some(kind))
    })
}

fn text_message(e: &Event) -> Option<&crate::event::Message> {
    match &e.kind {
        EventKind::Message(m) | EventKind::EditedMessage(m) => Some(m),
        _ => None,
    }
}

/// Text is one of the given commands.
///
/// Intended as a guard on filter routes; command routes are matched through
/// the router's trie instead.
pub fn command(parser: CommandParser, names: &[&str]) -> Filter {
    let wanted: HashSet<String> = names.iter().map(|n| parser.normalize(n)).collect();
    let label = format!("command:{}", names.join(","));
    Filter::leaf(label, move |e: &Event| {
        parser
            .parse_event(e)
            .is_some_and(|cmd| wanted.contains(&cmd.name))
    })
}

/// Message text matches `pattern` anywhere (search semantics).
pub fn regex(cache: &RegexCache, pattern: &str) -> Result<Filter, regex::Error> {
    let re = cache.get(pattern)?;
    Ok(regex_leaf(format!("regex:{pattern}"), re, Event::text))
}

/// Message caption matches `pattern` anywhere.
pub fn caption_regex(cache: &RegexCache, pattern: &str) -> Result<Filter, regex::Error> {
    let re = cache.get(pattern)?;
    Ok(regex_leaf(format!("caption_regex:{pattern}"), re, Event::caption))
}

fn regex_leaf(name: String, re: Arc<Regex>, field: fn(&Event) -> Option<&str>) -> Filter {
    Filter::leaf(name, move |e: &Event| field(e).is_some_and(|s| re.is_match(s)))
}

/// Callback query whose data starts with `prefix`.
pub fn callback_data(prefix: &str) -> Filter {
    let prefix = prefix.to_string();
    Filter::leaf(format!("callback:{prefix}"), move |e: &Event| {
        e.callback_data().is_some_and(|d| d.starts_with(&prefix))
    })
}

pub fn chat(ids: &[i64]) -> Filter {
    let ids: HashSet<i64> = ids.iter().copied().collect();
    Filter::leaf("chat", move |e: &Event| e.chat().is_some_and(|c| ids.contains(&c.id)))
}

pub fn users(ids: &[i64]) -> Filter {
    let ids: HashSet<i64> = ids.iter().copied().collect();
    Filter::leaf("users", move |e: &Event| e.user().is_some_and(|u| ids.contains(&u.id)))
}

pub fn from_bot() -> Filter {
    Filter::leaf("from_bot", |e: &Event| e.user().is_some_and(|u| u.is_bot))
}
