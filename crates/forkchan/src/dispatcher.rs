//! Worker-side start-up - decides whether this process is a re-executed worker.
//!
//! The launcher side (socket pair, spawn) is in launcher.rs.
//!
//! Flow:
//! 1. Classify the argument vector into a [`StartupMode`]
//! 2. Orchestrator: return and let normal start-up continue
//! 3. Worker: claim the channel at the inherited slot, run the entrypoint, exit

use std::ffi::{OsStr, OsString};
use std::os::fd::RawFd;

use crate::bridge::channel::MessageChannel;
use crate::descriptor::{DescriptorError, WORKER_CHANNEL_FD, claim_inherited};
use crate::registry::Registry;

/// Exit status used when a worker was not started through the launcher.
pub const EXIT_BAD_ENVIRONMENT: i32 = 1;

/// How this process was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMode {
    /// Normal start-up; not a re-executed worker.
    Orchestrator,
    /// Re-executed to run the named registered sub-command.
    Worker(String),
}

impl StartupMode {
    /// Classify an argument vector (program name first) against `registry`.
    pub fn detect<I, S>(args: I, registry: &Registry) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let Some(name) = args.into_iter().nth(1) else {
            return Self::Orchestrator;
        };
        match name.as_ref().to_str() {
            Some(name) if registry.contains(name) => Self::Worker(name.to_string()),
            _ => Self::Orchestrator,
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, Self::Worker(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("worker channel unavailable: {0}")]
    Channel(#[from] DescriptorError),
}

pub struct Dispatcher<'a> {
    registry: &'a Registry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Classify the current process from `std::env::args_os`.
    pub fn startup_mode(&self) -> StartupMode {
        let args: Vec<OsString> = std::env::args_os().collect();
        StartupMode::detect(args, self.registry)
    }

    /// Run as a worker if this process was launched as one, otherwise return.
    ///
    /// Call this first thing in `main`, after the registry is built. In worker mode
    /// this never returns: the process exits with the entrypoint's return value, or
    /// with [`EXIT_BAD_ENVIRONMENT`] if the inherited channel is missing or invalid.
    pub fn maybe_run_as_worker(&self) {
        let StartupMode::Worker(name) = self.startup_mode() else {
            return;
        };

        // SAFETY: the slot is only ever claimed here, once, before the worker's
        // entrypoint (the only other code that could touch descriptors) runs.
        match unsafe { self.run_worker(&name, WORKER_CHANNEL_FD) } {
            Ok(code) => {
                tracing::debug!(command = %name, exit_code = code, "Worker finished");
                std::process::exit(code);
            }
            Err(e) => {
                tracing::error!(command = %name, error = %e, "Worker was not launched correctly");
                std::process::exit(EXIT_BAD_ENVIRONMENT);
            }
        }
    }

    /// Claim the channel at `fd` and run the entrypoint registered as `name`.
    ///
    /// Returns the entrypoint's exit code without exiting the process.
    ///
    /// # Safety
    ///
    /// `fd` must not be owned or used by anything else in the process; ownership
    /// passes to the worker's channel.
    pub unsafe fn run_worker(&self, name: &str, fd: RawFd) -> Result<i32, DispatchError> {
        let entrypoint = self
            .registry
            .lookup(name)
            .ok_or_else(|| DispatchError::UnknownCommand(name.to_string()))?;

        let stream = unsafe { claim_inherited(fd) }?;
        tracing::debug!(command = %name, pid = std::process::id(), "Running as worker");

        Ok(entrypoint(MessageChannel::from_stream(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::os::unix::net::UnixStream;

    fn echo_once(mut chan: MessageChannel) -> i32 {
        match chan.recv::<serde_json::Value>() {
            Ok(v) => match chan.send(&v) {
                Ok(()) => 0,
                Err(_) => 3,
            },
            Err(_) => 2,
        }
    }

    fn registry() -> Registry {
        Registry::new().with("echo", echo_once)
    }

    #[test]
    fn no_subcommand_is_orchestrator() {
        let registry = registry();
        assert_eq!(
            StartupMode::detect(["/usr/bin/app"], &registry),
            StartupMode::Orchestrator
        );
        assert_eq!(
            StartupMode::detect(Vec::<String>::new(), &registry),
            StartupMode::Orchestrator
        );
    }

    #[test]
    fn unregistered_subcommand_is_orchestrator() {
        let registry = registry();
        let mode = StartupMode::detect(["/usr/bin/app", "--help"], &registry);
        assert_eq!(mode, StartupMode::Orchestrator);
        assert!(!mode.is_worker());
    }

    #[test]
    fn registered_subcommand_is_worker() {
        let registry = registry();
        let mode = StartupMode::detect(["/usr/bin/app", "echo"], &registry);
        assert_eq!(mode, StartupMode::Worker("echo".to_string()));
        assert!(mode.is_worker());
    }

    #[test]
    fn only_second_argument_selects_worker() {
        let registry = registry();
        assert_eq!(
            StartupMode::detect(["/usr/bin/app", "run", "echo"], &registry),
            StartupMode::Orchestrator
        );
        assert_eq!(
            StartupMode::detect(["echo"], &registry),
            StartupMode::Orchestrator
        );
    }

    #[test]
    fn run_worker_hands_channel_to_entrypoint() {
        let registry = registry();
        let (parent, child) = UnixStream::pair().unwrap();
        let mut parent = MessageChannel::from_stream(parent);
        let child_fd = child.into_raw_fd();

        parent.send(&serde_json::json!({"op": "add"})).unwrap();
        let code = unsafe { Dispatcher::new(&registry).run_worker("echo", child_fd) }.unwrap();
        let echoed: serde_json::Value = parent.recv().unwrap();

        assert_eq!(code, 0);
        assert_eq!(echoed, serde_json::json!({"op": "add"}));
    }

    #[test]
    fn run_worker_rejects_unknown_name_before_claiming() {
        let registry = registry();
        let (_parent, child) = UnixStream::pair().unwrap();

        let err = unsafe { Dispatcher::new(&registry).run_worker("nope", child.as_raw_fd()) }
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCommand(name) if name == "nope"));
    }

    #[test]
    fn run_worker_rejects_non_socket_descriptor() {
        let registry = registry();
        let raw = std::fs::File::open("/dev/null").unwrap().into_raw_fd();

        let err = unsafe { Dispatcher::new(&registry).run_worker("echo", raw) }.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Channel(DescriptorError::NotASocket { .. })
        ));
    }
}
