//! The core, UI-agnostic library for the `espmigrate` utility.
//!
//! `espmigrate-core` moves the flash contents of an ESP32 with flash
//! encryption disabled onto an ESP32 with flash encryption enabled. Images are
//! read from the first board, encrypted where the second board expects
//! ciphertext, staged on disk, and written to the second board. The actual
//! flash access and encryption are done by Espressif's `esptool`, `espefuse`
//! and `espsecure`, which this crate drives through a replaceable
//! [`tool::ToolInvoker`].
//!
//! The library is structured into several key modules:
//! - [`config`]: The process-wide [`config::Config`].
//! - [`tool`]: Command lines for the delegated tools and how they are run.
//! - [`partition`]: Decoding of the binary partition table.
//! - [`efuse`]: Detection of a board's flash encryption state.
//! - [`staging`]: Naming and discovery of staged images.
//! - [`extract`]: Reading and encrypting images from the source board.
//! - [`deploy`]: Writing staged images to the destination board.
//! - [`workflow`]: The two-phase state machine tying it all together.
//! - [`preflight`]: Checks run before any board is touched.
//!
//! ## Example: Running a Migration
//!
//! ```rust,no_run
//! use espmigrate_core::config::Config;
//! use espmigrate_core::tool::{ProcessInvoker, Toolchain};
//! use espmigrate_core::workflow::{Connect, Event, MigrationWorkflow, Operator, Phase};
//!
//! struct Yes;
//!
//! impl Operator for Yes {
//!     fn await_connect(&mut self, _phase: Phase) -> Connect {
//!         Connect::Ready
//!     }
//!     fn confirm(&mut self, _phase: Phase) -> bool {
//!         true
//!     }
//!     fn notify(&mut self, event: &Event) {
//!         println!("{event:?}");
//!     }
//! }
//!
//! fn main() -> espmigrate_core::Result<()> {
//!     let mut config = Config::load(None)?;
//!     espmigrate_core::preflight::check_environment(&mut config)?;
//!
//!     let invoker = ProcessInvoker;
//!     let tools = Toolchain::new(&config, &invoker);
//!     let outcome = MigrationWorkflow::new(tools, Yes).run()?;
//!
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deploy;
pub mod efuse;
mod error;
pub mod extract;
pub mod partition;
pub mod preflight;
pub mod staging;
pub mod tool;
pub mod workflow;

pub use error::{Error, PreconditionError, Result};
