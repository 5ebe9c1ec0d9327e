//! Character trie keyed by command name.
//!
//! Lookup cost is bounded by the length of the name, independent of how many
//! commands are registered. Only exact names match; a registered prefix does
//! not match longer input.

use std::collections::HashMap;

struct TrieNode<V> {
    children: HashMap<char, TrieNode<V>>,
    values: Vec<V>,
}

impl<V> TrieNode<V> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            values: Vec::new(),
        }
    }
}

pub struct CommandTrie<V> {
    root: TrieNode<V>,
    keys: usize,
}

impl<V> CommandTrie<V> {
    pub fn new() -> Self {
        Self {
            root: TrieNode::new(),
            keys: 0,
        }
    }

    /// Values stored under `key`, creating the path if needed.
    pub fn entry(&mut self, key: &str) -> &mut Vec<V> {
        let mut node = &mut self.root;
        for ch in key.chars() {
            node = node.children.entry(ch).or_insert_with(TrieNode::new);
        }
        if node.values.is_empty() {
            self.keys += 1;
        }
        &mut node.values
    }

    pub fn insert(&mut self, key: &str, value: V) {
        self.entry(key).push(value);
    }

    pub fn get(&self, key: &str) -> Option<&[V]> {
        let mut node = &self.root;
        for ch in key.chars() {
            node = node.children.get(&ch)?;
        }
        if node.values.is_empty() {
            None
        } else {
            Some(&node.values)
        }
    }

    /// Number of distinct keys holding values.
    pub fn len(&self) -> usize {
        self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys == 0
    }
}

impl<V> Default for CommandTrie<V> {
    fn default() -> Self {
        Self::new()
    }
}
