//! Filter trie keyed by topic level.
//!
//! Each node holds the slot for filters ending exactly at that node, the slot
//! for `<node>/#`, one child per literal level and one `+` child. Matching a
//! topic walks literal and `+` children in parallel and picks up every `#`
//! slot on the way, so lookup cost depends on topic depth rather than on the
//! number of subscriptions.

use std::collections::HashMap;

use super::filter::{MULTI_LEVEL, SINGLE_LEVEL, TopicFilter};

/// Slot payload stored at a trie position.
pub trait Slot: Default {
    fn is_vacant(&self) -> bool;
}

impl<E> Slot for Vec<E> {
    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

#[derive(Debug)]
struct Node<T> {
    exact: Option<T>,
    children: HashMap<String, Node<T>>,
    single_level: Option<Box<Node<T>>>,
    multi_level: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            exact: None,
            children: HashMap::new(),
            single_level: None,
            multi_level: None,
        }
    }
}

impl<T: Slot> Node<T> {
    fn is_empty(&self) -> bool {
        self.exact.as_ref().is_none_or(T::is_vacant)
            && self.children.is_empty()
            && self.single_level.is_none()
            && self.multi_level.as_ref().is_none_or(T::is_vacant)
    }

    /// Applies `f` to the slot at `levels`, pruning anything left empty.
    fn update<R>(&mut self, levels: &[&str], f: impl FnOnce(&mut T) -> R) -> Option<R> {
        match levels {
            [] => {
                let slot = self.exact.as_mut()?;
                let result = f(slot);
                if slot.is_vacant() {
                    self.exact = None;
                }
                Some(result)
            }
            [MULTI_LEVEL, ..] => {
                let slot = self.multi_level.as_mut()?;
                let result = f(slot);
                if slot.is_vacant() {
                    self.multi_level = None;
                }
                Some(result)
            }
            [SINGLE_LEVEL, rest @ ..] => {
                let child = self.single_level.as_mut()?;
                let result = child.update(rest, f);
                if child.is_empty() {
                    self.single_level = None;
                }
                result
            }
            [level, rest @ ..] => {
                let child = self.children.get_mut(*level)?;
                let result = child.update(rest, f);
                if child.is_empty() {
                    self.children.remove(*level);
                }
                result
            }
        }
    }

    fn get(&self, levels: &[&str]) -> Option<&T> {
        match levels {
            [] => self.exact.as_ref(),
            [MULTI_LEVEL, ..] => self.multi_level.as_ref(),
            [SINGLE_LEVEL, rest @ ..] => self.single_level.as_ref()?.get(rest),
            [level, rest @ ..] => self.children.get(*level)?.get(rest),
        }
    }

    fn collect<'a>(&'a self, topic: &[&str], out: &mut Vec<&'a T>) {
        match topic {
            [] => {
                out.extend(self.exact.iter());
                // `a/#` also matches the parent level `a`
                out.extend(self.multi_level.iter());
            }
            [level, rest @ ..] => {
                if let Some(child) = self.children.get(*level) {
                    child.collect(rest, out);
                }
                if let Some(plus) = &self.single_level {
                    plus.collect(rest, out);
                }
                out.extend(self.multi_level.iter());
            }
        }
    }

    fn collect_mut<'a>(&'a mut self, topic: &[&str], out: &mut Vec<&'a mut T>) {
        let Node {
            exact,
            children,
            single_level,
            multi_level,
        } = self;
        match topic {
            [] => {
                out.extend(exact.iter_mut());
                out.extend(multi_level.iter_mut());
            }
            [level, rest @ ..] => {
                if let Some(child) = children.get_mut(*level) {
                    child.collect_mut(rest, out);
                }
                if let Some(plus) = single_level {
                    plus.collect_mut(rest, out);
                }
                out.extend(multi_level.iter_mut());
            }
        }
    }

    fn visit<'a>(&'a self, out: &mut Vec<&'a T>) {
        out.extend(self.exact.iter());
        out.extend(self.multi_level.iter());
        if let Some(plus) = &self.single_level {
            plus.visit(out);
        }
        for child in self.children.values() {
            child.visit(out);
        }
    }

    fn visit_mut(&mut self, f: &mut dyn FnMut(&mut T)) {
        if let Some(slot) = self.exact.as_mut() {
            f(slot);
        }
        if let Some(slot) = self.multi_level.as_mut() {
            f(slot);
        }
        if let Some(plus) = self.single_level.as_mut() {
            plus.visit_mut(f);
        }
        for child in self.children.values_mut() {
            child.visit_mut(f);
        }
    }

    /// Drops vacant slots and empty children; returns whether `self` is empty.
    fn prune(&mut self) -> bool {
        if self.exact.as_ref().is_some_and(T::is_vacant) {
            self.exact = None;
        }
        if self.multi_level.as_ref().is_some_and(T::is_vacant) {
            self.multi_level = None;
        }
        if self.single_level.as_mut().is_some_and(|plus| plus.prune()) {
            self.single_level = None;
        }
        self.children.retain(|_, child| !child.prune());
        self.is_empty()
    }
}

#[derive(Debug)]
pub struct FilterTrie<T> {
    root: Node<T>,
}

impl<T: Slot> Default for FilterTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Slot> FilterTrie<T> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Slot for `filter`, created empty if absent.
    pub fn entry(&mut self, filter: &TopicFilter) -> &mut T {
        let mut node = &mut self.root;
        for level in filter.levels() {
            match level {
                MULTI_LEVEL => return node.multi_level.get_or_insert_with(T::default),
                SINGLE_LEVEL => {
                    node = &mut **node
                        .single_level
                        .get_or_insert_with(|| Box::new(Node::default()))
                }
                literal => node = node.children.entry(literal.to_string()).or_default(),
            }
        }
        node.exact.get_or_insert_with(T::default)
    }

    pub fn get(&self, filter: &TopicFilter) -> Option<&T> {
        let levels: Vec<&str> = filter.levels().collect();
        self.root.get(&levels)
    }

    /// Applies `f` to the slot of `filter`; `None` if there is no such slot.
    pub fn update<R>(&mut self, filter: &TopicFilter, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let levels: Vec<&str> = filter.levels().collect();
        self.root.update(&levels, f)
    }

    /// Every slot whose filter matches `topic`.
    pub fn matches(&self, topic: &str) -> Vec<&T> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut out = Vec::new();
        match levels.split_first() {
            // reserved topics are only reachable through a literal first level
            Some((first, rest)) if first.starts_with('$') => {
                if let Some(child) = self.root.children.get(*first) {
                    child.collect(rest, &mut out);
                }
            }
            _ => self.root.collect(&levels, &mut out),
        }
        out
    }

    pub fn matches_mut(&mut self, topic: &str) -> Vec<&mut T> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut out = Vec::new();
        match levels.split_first() {
            Some((first, rest)) if first.starts_with('$') => {
                if let Some(child) = self.root.children.get_mut(*first) {
                    child.collect_mut(rest, &mut out);
                }
            }
            _ => self.root.collect_mut(&levels, &mut out),
        }
        out
    }

    pub fn slots(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.root.visit(&mut out);
        out
    }

    /// Applies `f` to every slot, then prunes what was emptied.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        self.root.visit_mut(&mut f);
        self.root.prune();
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
    }
}
