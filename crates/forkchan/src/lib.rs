//! forkchan: run one binary as both a parent and named worker processes.
//!
//! The parent re-executes its own executable with a sub-command name and hands the
//! child one end of a socket pair at a fixed descriptor slot; the child recognises
//! the name at start-up, claims the socket and runs the registered entrypoint.
//!
//! ```no_run
//! use forkchan::{Dispatcher, Launcher, MessageChannel, Registry};
//!
//! fn echo(mut chan: MessageChannel) -> i32 {
//!     while let Ok(line) = chan.recv::<String>() {
//!         if line == "quit" || chan.send(&line).is_err() {
//!             break;
//!         }
//!     }
//!     0
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new().with("echo", echo);
//!     Dispatcher::new(&registry).maybe_run_as_worker();
//!
//!     let mut chan = Launcher::new(&registry).launch("echo")?;
//!     chan.send("hello")?;
//!     assert_eq!(chan.recv::<String>()?, "hello");
//!     chan.send("quit")?;
//!     chan.close();
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod descriptor;
pub mod dispatcher;
pub mod launcher;
pub mod logging;
pub mod registry;

pub use bridge::async_channel::AsyncMessageChannel;
pub use bridge::channel::{ChannelError, MessageChannel};
pub use bridge::codec::JsonCodec;
pub use descriptor::{DescriptorError, WORKER_CHANNEL_FD};
pub use dispatcher::{DispatchError, Dispatcher, EXIT_BAD_ENVIRONMENT, StartupMode};
pub use launcher::{LaunchError, Launcher, LauncherConfig, Worker};
pub use registry::{Entrypoint, Registry};
