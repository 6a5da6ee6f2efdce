//! Sub-command registry.
//!
//! Built once at start-up and then shared by reference with the dispatcher and the
//! launcher. Both sides of a re-exec build the same registry, so a name the parent
//! launches is a name the child recognises.

use std::collections::HashMap;

use crate::bridge::channel::MessageChannel;

/// Worker entrypoint. Receives the worker's end of the channel and returns the
/// process exit code.
pub type Entrypoint = fn(MessageChannel) -> i32;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    commands: HashMap<String, Entrypoint>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `entrypoint` under `name`. A later registration replaces an earlier one.
    pub fn register(&mut self, name: impl Into<String>, entrypoint: Entrypoint) -> &mut Self {
        let name = name.into();
        if self.commands.insert(name.clone(), entrypoint).is_some() {
            tracing::debug!(command = %name, "Replaced registered command");
        }
        self
    }

    pub fn with(mut self, name: impl Into<String>, entrypoint: Entrypoint) -> Self {
        self.register(name, entrypoint);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<Entrypoint> {
        self.commands.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names.into_iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_zero(_: MessageChannel) -> i32 {
        0
    }

    fn exit_seven(_: MessageChannel) -> i32 {
        7
    }

    fn run(entrypoint: Entrypoint) -> i32 {
        let (chan, _peer) = MessageChannel::pair().unwrap();
        entrypoint(chan)
    }

    #[test]
    fn lookup_returns_registered_entrypoint() {
        let registry = Registry::new().with("zero", exit_zero).with("seven", exit_seven);

        assert_eq!(run(registry.lookup("zero").unwrap()), 0);
        assert_eq!(run(registry.lookup("seven").unwrap()), 7);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = Registry::new();
        registry.register("cmd", exit_zero).register("cmd", exit_seven);

        assert_eq!(registry.len(), 1);
        let entry = registry.lookup("cmd").unwrap();
        assert!(std::ptr::fn_addr_eq(entry, exit_seven as Entrypoint));
        assert_eq!(run(entry), 7);
    }

    #[test]
    fn names_are_sorted_and_unvalidated() {
        let registry = Registry::new()
            .with("worker b", exit_zero)
            .with("", exit_zero)
            .with("alpha", exit_zero);

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["", "alpha", "worker b"]);
        assert!(registry.contains(""));
    }

    #[test]
    fn empty_registry() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.names().count(), 0);
    }
}
