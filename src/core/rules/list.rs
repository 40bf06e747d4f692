//! Numbered rule list
//!
//! Rule numbers are 1-based positions. An insert moves the rules from its
//! place on one up and a remove moves the rules after it one down, so the
//! numbers always read `1..=N` in list order.

use super::analyze::{Resolver, RuleCache, analyze_rule};
use super::assemble::assemble_rule;
use super::parse::parse_line;
use super::Rule;
use crate::collections::{List, NodeRef};
use crate::core::error::{Error, ParseError, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Shift {
    Up,
    Down,
}

#[derive(Debug, Default)]
pub struct RuleSet {
    list: List<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses persisted lines, skipping comments silently and malformed
    /// lines with a warning.
    ///
    /// Returns the set and the number of malformed lines.
    pub fn from_lines<I, S>(lines: I) -> (Self, usize)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        let mut skipped = 0;
        for (index, line) in lines.into_iter().enumerate() {
            let line = line.as_ref();
            match parse_line(line) {
                Ok(mut rule) => {
                    rule.number = u32::try_from(set.len() + 1).unwrap_or(u32::MAX);
                    set.list.append(rule);
                }
                Err(ParseError::Empty) => {}
                Err(e) => {
                    warn!("Skipping rule line {}: {} ({})", index + 1, e, line.trim());
                    skipped += 1;
                }
            }
        }
        debug!("Loaded {} rules ({} skipped)", set.len(), skipped);
        (set, skipped)
    }

    /// Every rule in its persisted form, in order.
    pub fn to_lines(&self) -> Vec<String> {
        self.list.values().map(assemble_rule).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> + '_ {
        self.list.values()
    }

    /// Rule with the given number.
    pub fn get(&self, number: u32) -> Option<&Rule> {
        self.list.values().find(|r| r.number == number)
    }

    fn node_of(&self, number: u32) -> Option<NodeRef> {
        self.list.find(|r| r.number == number)
    }

    /// Inserts `rule` so that it becomes number `place`.
    ///
    /// `place <= 1` inserts at the head, `place` past the end appends.
    /// Returns the number the rule received.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Container`] if the list is inconsistent.
    pub fn insert_at(&mut self, place: u32, mut rule: Rule) -> Result<u32> {
        let len = u32::try_from(self.len()).unwrap_or(u32::MAX);
        if place <= 1 || self.is_empty() {
            self.update_numbers(1, Shift::Up);
            rule.number = 1;
            self.list.prepend(rule);
            return Ok(1);
        }
        if place > len {
            rule.number = len + 1;
            self.list.append(rule);
            return Ok(len + 1);
        }
        let after = self.node_of(place - 1).ok_or_else(|| {
            Error::Parameter(format!("rule list has no rule {}", place - 1))
        })?;
        self.update_numbers(place, Shift::Up);
        rule.number = place;
        self.list.insert_after(Some(after), rule)?;
        Ok(place)
    }

    /// Removes and returns rule `place`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no rule has that number.
    pub fn remove_at(&mut self, place: u32) -> Result<Rule> {
        let node = self.node_of(place).ok_or_else(|| Error::NotFound {
            what: "rule",
            name: place.to_string(),
        })?;
        let rule = self.list.take(node)?;
        self.update_numbers(place + 1, Shift::Down);
        Ok(rule)
    }

    /// Moves every rule numbered `from` or higher one place up or down.
    fn update_numbers(&mut self, from: u32, shift: Shift) {
        for rule in self.list.values_mut().filter(|r| r.number >= from) {
            rule.number = match shift {
                Shift::Up => rule.number + 1,
                Shift::Down => rule.number - 1,
            };
        }
    }

    /// Numbers of the rules naming `object`.
    pub fn references(&self, object: &str) -> Vec<u32> {
        self.list
            .values()
            .filter(|r| r.references(object))
            .map(|r| r.number)
            .collect()
    }

    /// Rewrites every operand naming `old`; returns how many rules changed.
    pub fn rename_references(&mut self, old: &str, new: &str) -> usize {
        self.list
            .values_mut()
            .map(|r| r.rename_references(old, new))
            .filter(|changed| *changed)
            .count()
    }

    /// Analyzes every rule, collecting the caches and the per-rule failures.
    ///
    /// A failing rule is logged and skipped; the rest are still analyzed.
    pub fn analyze_all(&self, resolver: &Resolver<'_>) -> (Vec<RuleCache>, Vec<(u32, Error)>) {
        let mut caches = Vec::new();
        let mut errors = Vec::new();
        for rule in self.list.values() {
            match analyze_rule(rule, resolver) {
                Ok(Some(cache)) => caches.push(cache),
                Ok(None) => {}
                Err(e) => {
                    warn!("Rule {} skipped: {}", rule.number, e);
                    errors.push((rule.number, e));
                }
            }
        }
        (caches, errors)
    }
}
