//! Route registration, lookup and dispatch.
//!
//! # Responsibilities
//! - Store command routes in a trie and filter routes in a priority-ordered list
//! - Resolve an event to its ordered list of matching routes
//! - Invoke handlers in order, honouring propagation
//!
//! # Design Decisions
//! - Command routes always precede filter routes in the resolved list
//! - Within each group: priority descending, then registration order
//! - Regex routes use search semantics (match anywhere in the text)
//! - Registration happens before workers start; the router is read-only after

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use super::command::{CommandParser, ParsedCommand};
use super::filter::Filter;
use super::filters;
use super::regex_cache::RegexCache;
use super::trie::CommandTrie;
use crate::config::{Propagation, RouterConfig};
use crate::event::Event;
use crate::handler::{Context, Flow, Handler, HandlerError, Outcome};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("command `{command}` is already registered at priority {priority}")]
    DuplicateRegistration { command: String, priority: i32 },

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// What a route matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Exact command name, case-insensitive, prefix optional.
    Command(String),
    /// Regular expression searched in message text.
    Regex(String),
    /// Only the route's filter expression decides.
    Filter,
}

pub struct Route {
    name: String,
    pattern: Pattern,
    filter: Filter,
    handler: Arc<dyn Handler>,
    priority: i32,
    order: usize,
}

impl Route {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Position in registration order.
    pub fn order(&self) -> usize {
        self.order
    }

    fn sort_key(&self) -> (Reverse<i32>, usize) {
        (Reverse(self.priority), self.order)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("filter", &self.filter)
            .field("priority", &self.priority)
            .field("order", &self.order)
            .finish()
    }
}

pub struct Router {
    parser: CommandParser,
    commands: CommandTrie<Arc<Route>>,
    filtered: Vec<Arc<Route>>,
    regex_cache: RegexCache,
    propagation: Propagation,
    strict: bool,
    next_order: usize,
}

impl Router {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            parser: CommandParser::new(config.command_prefix)
                .with_bot_username(config.bot_username.as_deref()),
            commands: CommandTrie::new(),
            filtered: Vec::new(),
            regex_cache: RegexCache::new(config.regex_cache_capacity),
            propagation: config.propagation,
            strict: config.strict,
            next_order: 0,
        }
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    pub fn regex_cache(&self) -> &RegexCache {
        &self.regex_cache
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// Register `handler` for `pattern`, guarded by `filter`.
    ///
    /// Returns the route's registration position.
    pub fn register<H: Handler>(
        &mut self,
        pattern: Pattern,
        filter: Filter,
        handler: H,
        priority: i32,
    ) -> Result<usize, RouterError> {
        self.register_shared(pattern, filter, Arc::new(handler), priority)
    }

    pub fn register_shared(
        &mut self,
        pattern: Pattern,
        filter: Filter,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> Result<usize, RouterError> {
        let order = self.next_order;
        match pattern {
            Pattern::Command(raw) => {
                let key = self.parser.normalize(&raw);
                if key.is_empty() || key.contains(char::is_whitespace) || key.contains('@') {
                    return Err(RouterError::InvalidPattern {
                        pattern: raw,
                        reason: "command names must be a single non-empty word".into(),
                    });
                }
                let existing = self.commands.get(&key).unwrap_or(&[]);
                if self.strict && existing.iter().any(|r| r.priority == priority) {
                    return Err(RouterError::DuplicateRegistration {
                        command: key,
                        priority,
                    });
                }
                let route = Arc::new(Route {
                    name: format!("{}{}", self.parser.prefix(), key),
                    pattern: Pattern::Command(key.clone()),
                    filter,
                    handler,
                    priority,
                    order,
                });
                let routes = self.commands.entry(&key);
                routes.push(route);
                routes.sort_by_key(|r| r.sort_key());
            }
            Pattern::Regex(raw) => {
                let matcher = filters::regex(&self.regex_cache, &raw).map_err(|e| {
                    RouterError::InvalidPattern {
                        pattern: raw.clone(),
                        reason: e.to_string(),
                    }
                })?;
                self.push_filtered(Route {
                    name: format!("regex:{raw}"),
                    pattern: Pattern::Regex(raw),
                    filter: matcher & filter,
                    handler,
                    priority,
                    order,
                });
            }
            Pattern::Filter => {
                self.push_filtered(Route {
                    name: filter.to_string(),
                    pattern: Pattern::Filter,
                    filter,
                    handler,
                    priority,
                    order,
                });
            }
        }
        self.next_order += 1;
        Ok(order)
    }

    fn push_filtered(&mut self, route: Route) {
        self.filtered.push(Arc::new(route));
        self.filtered.sort_by_key(|r| r.sort_key());
    }

    /// Register a command route with no guard at priority 0.
    pub fn command<H: Handler>(&mut self, name: &str, handler: H) -> Result<usize, RouterError> {
        self.register(Pattern::Command(name.to_string()), Filter::always(), handler, 0)
    }

    /// Register a regex route with no guard at priority 0.
    pub fn regex<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<usize, RouterError> {
        self.register(Pattern::Regex(pattern.to_string()), Filter::always(), handler, 0)
    }

    /// Register a filter route at priority 0.
    pub fn on<H: Handler>(&mut self, filter: Filter, handler: H) -> Result<usize, RouterError> {
        self.register(Pattern::Filter, filter, handler, 0)
    }

    pub fn parse_command(&self, event: &Event) -> Option<ParsedCommand> {
        self.parser.parse_event(event)
    }

    /// Matching routes for `event`, lazily evaluated, in dispatch order.
    pub fn matching<'a>(&'a self, event: &'a Event) -> impl Iterator<Item = &'a Arc<Route>> + 'a {
        let by_command = self
            .parser
            .parse_event(event)
            .and_then(|cmd| self.commands.get(&cmd.name))
            .unwrap_or(&[]);
        by_command
            .iter()
            .chain(self.filtered.iter())
            .filter(move |route| route.filter.matches(event))
    }

    /// Every matching route for `event`, in dispatch order.
    pub fn resolve(&self, event: &Event) -> Vec<Arc<Route>> {
        self.matching(event).cloned().collect()
    }

    /// Run matching handlers for the context's event.
    ///
    /// A handler error aborts the remaining handlers; the whole item is then
    /// retried, so earlier handlers of a run-all dispatch may run again.
    pub async fn dispatch(&self, ctx: &Context) -> Result<Outcome, HandlerError> {
        let mut invoked = 0usize;
        for route in self.matching(ctx.event()) {
            invoked += 1;
            tracing::debug!(
                route = %route.name,
                sequence_id = ctx.event().sequence_id,
                "Invoking handler"
            );
            let flow = route.handler.handle(ctx.clone()).await?;
            let stop = match flow {
                Flow::Stop => true,
                Flow::Continue => false,
                Flow::Handled => self.propagation == Propagation::FirstMatch,
            };
            if stop {
                break;
            }
        }

        if invoked == 0 {
            Ok(Outcome::NoMatch)
        } else {
            Ok(Outcome::Handled { handlers: invoked })
        }
    }

    /// (distinct command names, filter routes).
    pub fn route_counts(&self) -> (usize, usize) {
        (self.commands.len(), self.filtered.len())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(&RouterConfig::default())
    }
}
