//! wix-managed - Managed UI and custom action runtime for WiX installers
//!
//! Drives installer dialog sequences, dispatches setup lifecycle events and
//! carries UI-collected data across the immediate/deferred boundary.
//!
//! # Architecture
//!
//! ```text
//! Host engine -> ManagedProject -> EventRegistry / UiShell -> Session + DataBag
//!                                        |
//!                       capture_for_deferred -> CustomActionData -> DeferredSession
//! ```
//!
//! The data bag is a flat string map serialized into a single session
//! property, so anything a dialog or handler stores survives into deferred
//! actions, which can no longer read the live session.
//!
//! # Example
//!
//! ```
//! use wix_managed::{ActionResult, ManagedProject, MemorySession, SetupEvent};
//!
//! let mut project = ManagedProject::new("My App");
//! project.on(SetupEvent::Load, |args| {
//!     args.data.insert("AppName", "My App");
//!     Ok(())
//! });
//!
//! let mut session = MemorySession::new().with_install_dir("C:\\Program Files\\My App");
//! assert_eq!(project.invoke_entry_point("Load", &mut session), ActionResult::Success);
//! ```

pub mod bridge;
pub mod condition;
pub mod config;
pub mod data;
pub mod dialogs;
pub mod events;
pub mod project;
pub mod scenario;
pub mod session;
pub mod shell;

// Re-export main types
pub use bridge::{
    capture_for_deferred, parse_property_list, rehydrate_from_deferred, stage_environment,
    try_rehydrate, BridgeError, CustomActionData, DeferredContext, DeferredSession,
};
pub use condition::{Condition, ConditionError, PropertySource};
pub use config::{ConfigError, RuntimeConfig};
pub use data::{CodecError, DataBag, RUNTIME_DATA_PROPERTY};
pub use dialogs::{
    DialogContext, DialogDescriptor, DialogKind, DialogRole, ManagedDialog, ManagedDialogs,
    ManagedUI,
};
pub use events::{EventRegistry, ExceptionEventArgs, SetupEvent, SetupEventArgs};
pub use project::{DeferredRun, ManagedProject};
pub use scenario::{NavStep, Scenario, ScenarioError, ScenarioReport};
pub use session::{
    ActionResult, InstallMode, MemorySession, Session, SessionError, SetupMode, UILevel,
};
pub use shell::{ExitStatus, HookAction, ShellState, UiOutcome, UiShell};
