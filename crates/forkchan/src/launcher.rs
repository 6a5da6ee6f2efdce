//! Launcher - re-executes the current binary as a named worker.
//!
//! Flow:
//! 1. Check the name against the registry (nothing is created for unknown names)
//! 2. Create a connected Unix socket pair
//! 3. Spawn the current executable with the name as its only argument, the child
//!    end installed at the inherited slot
//! 4. Drop the parent's copy of the child end, wrap the other end as a channel

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::bridge::channel::MessageChannel;
use crate::descriptor::{install_at_slot, off_worker_slot};
use crate::registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("failed to resolve current executable: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("failed to create socket pair: {0}")]
    SocketPair(#[source] io::Error),
    #[error("failed to spawn worker `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Executable to re-invoke. `None` means `std::env::current_exe()`.
    pub program: Option<PathBuf>,
    /// Extra environment for the worker on top of the inherited environment.
    pub envs: Vec<(OsString, OsString)>,
    /// Share the parent's stdout/stderr with the worker. Stdin is always null.
    pub inherit_stdio: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LauncherConfig {
    pub fn new() -> Self {
        Self {
            program: None,
            envs: Vec::new(),
            inherit_stdio: true,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }
}

/// A running worker: the parent's end of its channel plus its process handle.
///
/// Dropping a `Worker` neither kills nor reaps the child.
#[derive(Debug)]
pub struct Worker {
    name: String,
    channel: MessageChannel,
    child: Child,
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn channel(&mut self) -> &mut MessageChannel {
        &mut self.channel
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Ask the worker to stop with SIGTERM.
    pub fn terminate(&self) -> io::Result<()> {
        let pid = i32::try_from(self.child.id()).map_err(io::Error::other)?;
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
    }

    pub fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    /// Keep only the channel; the child keeps running on its own.
    pub fn into_channel(self) -> MessageChannel {
        self.channel
    }

    pub fn into_parts(self) -> (MessageChannel, Child) {
        (self.channel, self.child)
    }
}

pub struct Launcher<'a> {
    registry: &'a Registry,
    config: LauncherConfig,
}

impl<'a> Launcher<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self::with_config(registry, LauncherConfig::new())
    }

    pub fn with_config(registry: &'a Registry, config: LauncherConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Start the worker registered as `name` and return the parent's channel to it.
    pub fn launch(&self, name: &str) -> Result<MessageChannel, LaunchError> {
        self.spawn(name).map(Worker::into_channel)
    }

    /// Start the worker registered as `name`, keeping its process handle.
    pub fn spawn(&self, name: &str) -> Result<Worker, LaunchError> {
        if !self.registry.contains(name) {
            return Err(LaunchError::UnknownCommand(name.to_string()));
        }

        let program = match &self.config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(LaunchError::CurrentExe)?,
        };

        // Both ends are close-on-exec; only the child end is re-installed in the child.
        let (parent_end, child_end) = UnixStream::pair().map_err(LaunchError::SocketPair)?;
        let child_end = off_worker_slot(OwnedFd::from(child_end)).map_err(LaunchError::SocketPair)?;
        let child_fd = child_end.as_raw_fd();

        let mut command = Command::new(&program);
        command
            .arg(name)
            .stdin(Stdio::null())
            .envs(self.config.envs.iter().map(|(k, v)| (k, v)));
        if !self.config.inherit_stdio {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        // SAFETY: the hook only calls dup2 on descriptors that stay open until spawn
        // returns, and child_fd is never the worker slot (see off_worker_slot).
        unsafe {
            command.pre_exec(move || install_at_slot(child_fd));
        }

        tracing::debug!(command = %name, program = %program.display(), "Spawning worker");

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                // ignore close(2) errors on purpose here
                drop(parent_end);
                drop(child_end);
                return Err(LaunchError::Spawn {
                    name: name.to_string(),
                    source,
                });
            }
        };

        // The worker has its own copy now; keeping ours would hide EOF from the parent.
        drop(child_end);

        tracing::debug!(command = %name, pid = child.id(), "Worker spawned");

        Ok(Worker {
            name: name.to_string(),
            channel: MessageChannel::from_stream(parent_end),
            child,
        })
    }
}
