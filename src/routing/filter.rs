//! Composable filter expressions.
//!
//! # Responsibilities
//! - Wrap atomic predicates over an [`Event`] as named leaves
//! - Combine them with AND, OR and NOT into an expression tree
//! - Evaluate the tree with short-circuit semantics
//!
//! # Design Decisions
//! - Expressions are immutable values; combinators build new trees
//! - `all([])` is the always-true leaf and `any([])` the always-false leaf
//! - Leaves carry a name so routes can be logged and inspected

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use crate::event::Event;

pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum Filter {
    Leaf { name: Arc<str>, predicate: Predicate },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn leaf<F>(name: impl Into<Arc<str>>, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Filter::Leaf {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn always() -> Self {
        Filter::leaf("always", |_| true)
    }

    pub fn never() -> Self {
        Filter::leaf("never", |_| false)
    }

    /// Conjunction of `filters`; empty input yields [`Filter::always`].
    pub fn all<I>(filters: I) -> Self
    where
        I: IntoIterator<Item = Filter>,
    {
        filters
            .into_iter()
            .reduce(Filter::and)
            .unwrap_or_else(Filter::always)
    }

    /// Disjunction of `filters`; empty input yields [`Filter::never`].
    pub fn any<I>(filters: I) -> Self
    where
        I: IntoIterator<Item = Filter>,
    {
        filters
            .into_iter()
            .reduce(Filter::or)
            .unwrap_or_else(Filter::never)
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluate against `event`. The right side of AND/OR is skipped once the
    /// left side decides the result.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Filter::Leaf { predicate, .. } => predicate(event),
            Filter::And(left, right) => left.matches(event) && right.matches(event),
            Filter::Or(left, right) => left.matches(event) || right.matches(event),
            Filter::Not(inner) => !inner.matches(event),
        }
    }

    /// Leaf names in evaluation order.
    pub fn leaf_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Leaf { name, .. } => out.push(name.as_ref()),
            Filter::And(l, r) | Filter::Or(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            Filter::Not(inner) => inner.collect_names(out),
        }
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        self.and(rhs)
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        self.or(rhs)
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        self.negate()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Leaf { name, .. } => f.write_str(name),
            Filter::And(l, r) => write!(f, "({l} & {r})"),
            Filter::Or(l, r) => write!(f, "({l} | {r})"),
            Filter::Not(inner) => write!(f, "!{inner}"),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Chat, EventKind, Message, User};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(text: &str) -> Event {
        Event::new(
            1,
            EventKind::Message(Message::text(1, Chat::private(1), User::new(1, "a"), text)),
        )
    }

    fn counting(name: &'static str, result: bool, calls: Arc<AtomicUsize>) -> Filter {
        Filter::leaf(name, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[test]
    fn not_inverts_every_expression() {
        let e = event("x");
        let exprs = [
            Filter::always(),
            Filter::never(),
            Filter::always() & Filter::never(),
            Filter::always() | Filter::never(),
        ];
        for f in exprs {
            let expected = !f.matches(&e);
            assert_eq!((!f).matches(&e), expected);
        }
    }

    #[test]
    fn and_skips_right_side_when_left_is_false() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = Filter::never() & counting("rhs", true, calls.clone());
        assert!(!f.matches(&event("x")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn or_skips_right_side_when_left_is_true() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = Filter::always() | counting("rhs", false, calls.clone());
        assert!(f.matches(&event("x")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_all_and_any() {
        let e = event("x");
        assert!(Filter::all(Vec::new()).matches(&e));
        assert!(!Filter::any(Vec::new()).matches(&e));
    }

    #[test]
    fn all_and_any_fold_left_to_right() {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = Filter::all([
            counting("a", true, calls.clone()),
            counting("b", false, calls.clone()),
            counting("c", true, calls.clone()),
        ]);
        assert!(!f.matches(&event("x")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(f.leaf_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn display_renders_tree() {
        let f = !(Filter::leaf("text", |_| true) & Filter::leaf("private", |_| true))
            | Filter::never();
        assert_eq!(f.to_string(), "(!(text & private) | never)");
    }
}
