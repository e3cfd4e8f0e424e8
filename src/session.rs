//! Host session abstraction
//!
//! The installer engine exposes a string-keyed property store to every custom
//! action. This module defines the contract the runtime consumes, an in-memory
//! implementation used by the simulator and the tests, and the helpers that
//! derive the setup mode from well-known MSI properties.

use crate::condition::PropertySource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Well-known MSI property names
pub mod props {
    pub const INSTALLED: &str = "Installed";
    pub const REMOVE: &str = "REMOVE";
    pub const REINSTALL: &str = "REINSTALL";
    pub const UPGRADING_PRODUCT_CODE: &str = "UPGRADINGPRODUCTCODE";
    pub const PRODUCT_NAME: &str = "ProductName";
    pub const PRODUCT_CODE: &str = "ProductCode";
    pub const PRODUCT_VERSION: &str = "ProductVersion";
    pub const UPGRADE_CODE: &str = "UpgradeCode";
    pub const MANUFACTURER: &str = "Manufacturer";
    pub const INSTALL_DIR: &str = "INSTALLDIR";
    pub const UI_LEVEL: &str = "UILevel";
    pub const MSI_FILE: &str = "MsiFile";
    pub const MODIFY_ACTION: &str = "MODIFY_ACTION";
    /// Set by the host on the session handed to a deferred action
    pub const CUSTOM_ACTION_DATA: &str = "CustomActionData";
    /// Marks a session driven by the managed UI
    pub const MANAGED_UI: &str = "MANAGED_UI";
    pub const MANAGED_UI_HANDLE: &str = "MANAGED_UI_HANDLE";
    /// Raised when the user cancels after execution has started
    pub const CANCEL_REQUEST: &str = "MANAGED_UI_CANCEL_REQUEST";
}

/// Error writing to a host session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is no longer active")]
    Inactive,

    #[error("Property '{0}' is read-only in this context")]
    ReadOnly(String),
}

/// Property store exposed by the host installer engine.
///
/// Missing properties read as the empty string, the way the engine reports them.
pub trait Session {
    /// Get a property value (empty when not set)
    fn property(&self, name: &str) -> String;

    /// Set a property value
    fn set_property(&mut self, name: &str, value: &str) -> Result<(), SessionError>;

    /// Write a line to the host engine log
    fn log(&mut self, message: &str);

    /// Whether property writes reach the live engine session
    fn is_active(&self) -> bool {
        true
    }
}

impl PropertySource for dyn Session + '_ {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = self.property(name);
        (!value.is_empty()).then_some(value)
    }
}

/// Custom action return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionResult {
    #[default]
    Success,
    Failure,
    UserExit,
    /// Skip the remaining actions of the sequence without failing
    SkipRemainingActions,
}

impl ActionResult {
    /// Win32 code the engine expects from a custom action entry point
    pub fn to_code(&self) -> u32 {
        match self {
            ActionResult::Success => 0,
            ActionResult::SkipRemainingActions => 259,
            ActionResult::UserExit => 1602,
            ActionResult::Failure => 1603,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ActionResult::Success,
            259 => ActionResult::SkipRemainingActions,
            1602 => ActionResult::UserExit,
            _ => ActionResult::Failure,
        }
    }

    /// Whether this result stops the remaining handlers of an event
    pub fn is_abort(&self) -> bool {
        matches!(self, ActionResult::Failure | ActionResult::UserExit)
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionResult::Success => write!(f, "success"),
            ActionResult::Failure => write!(f, "failure"),
            ActionResult::UserExit => write!(f, "user-exit"),
            ActionResult::SkipRemainingActions => write!(f, "skip-remaining-actions"),
        }
    }
}

/// Requested installation mode, used to seed a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Install,
    Modify,
    Repair,
    Remove,
    Upgrade,
}

/// UI level the engine runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UILevel {
    None,
    Basic,
    Reduced,
    #[default]
    Full,
}

impl UILevel {
    /// Numeric value of the `UILevel` property
    pub fn value(&self) -> i32 {
        match self {
            UILevel::None => 2,
            UILevel::Basic => 3,
            UILevel::Reduced => 4,
            UILevel::Full => 5,
        }
    }
}

/// Setup mode as detected from session/bag properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupMode {
    Installing,
    Modifying,
    Uninstalling,
    Repairing,
    Unknown,
}

impl SetupMode {
    /// Detect the mode from `Installed`, `REMOVE` and `REINSTALL`
    pub fn detect<P: PropertySource + ?Sized>(props: &P) -> Self {
        if is_installing(props) {
            SetupMode::Installing
        } else if is_modifying(props) {
            SetupMode::Modifying
        } else if is_uninstalling(props) {
            SetupMode::Uninstalling
        } else if is_repairing(props) {
            SetupMode::Repairing
        } else {
            SetupMode::Unknown
        }
    }
}

impl fmt::Display for SetupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupMode::Installing => write!(f, "installing"),
            SetupMode::Modifying => write!(f, "modifying"),
            SetupMode::Uninstalling => write!(f, "uninstalling"),
            SetupMode::Repairing => write!(f, "repairing"),
            SetupMode::Unknown => write!(f, "unknown"),
        }
    }
}

fn is_all<P: PropertySource + ?Sized>(props: &P, name: &str) -> bool {
    props
        .lookup(name)
        .is_some_and(|v| v.eq_ignore_ascii_case("ALL"))
}

pub fn is_installed<P: PropertySource + ?Sized>(props: &P) -> bool {
    props.lookup(props::INSTALLED).is_some()
}

pub fn is_installing<P: PropertySource + ?Sized>(props: &P) -> bool {
    !is_installed(props) && !is_all(props, props::REMOVE)
}

pub fn is_uninstalling<P: PropertySource + ?Sized>(props: &P) -> bool {
    is_all(props, props::REMOVE)
}

pub fn is_repairing<P: PropertySource + ?Sized>(props: &P) -> bool {
    is_installed(props) && is_all(props, props::REINSTALL)
}

pub fn is_modifying<P: PropertySource + ?Sized>(props: &P) -> bool {
    is_installed(props) && !is_all(props, props::REINSTALL) && !is_all(props, props::REMOVE)
}

pub fn is_upgrading<P: PropertySource + ?Sized>(props: &P) -> bool {
    is_modifying(props) && props.lookup(props::UPGRADING_PRODUCT_CODE).is_some()
}

/// In-memory session used by the simulator and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySession {
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Properties the host refuses to change
    #[serde(default)]
    pub read_only: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for MemorySession {
    fn default() -> Self {
        Self {
            properties: HashMap::new(),
            log: Vec::new(),
            active: true,
            read_only: Vec::new(),
        }
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_install_dir(self, dir: &str) -> Self {
        self.with_property(props::INSTALL_DIR, dir)
    }

    pub fn with_product_info(self, name: &str, version: &str, manufacturer: &str) -> Self {
        self.with_property(props::PRODUCT_NAME, name)
            .with_property(props::PRODUCT_VERSION, version)
            .with_property(props::MANUFACTURER, manufacturer)
    }

    /// Seed `Installed`/`REMOVE`/`REINSTALL`/`UPGRADINGPRODUCTCODE` for a mode
    pub fn install_mode(mut self, mode: InstallMode) -> Self {
        for name in [
            props::INSTALLED,
            props::REMOVE,
            props::REINSTALL,
            props::UPGRADING_PRODUCT_CODE,
        ] {
            self.properties.remove(name);
        }
        match mode {
            InstallMode::Install => {}
            InstallMode::Modify => {
                self.properties
                    .insert(props::INSTALLED.to_string(), "00:00:00".to_string());
            }
            InstallMode::Repair => {
                self.properties
                    .insert(props::INSTALLED.to_string(), "00:00:00".to_string());
                self.properties
                    .insert(props::REINSTALL.to_string(), "ALL".to_string());
            }
            InstallMode::Remove => {
                self.properties
                    .insert(props::INSTALLED.to_string(), "00:00:00".to_string());
                self.properties
                    .insert(props::REMOVE.to_string(), "ALL".to_string());
            }
            InstallMode::Upgrade => {
                self.properties
                    .insert(props::INSTALLED.to_string(), "00:00:00".to_string());
                self.properties.insert(
                    props::UPGRADING_PRODUCT_CODE.to_string(),
                    "{00000000-0000-0000-0000-000000000001}".to_string(),
                );
            }
        }
        self
    }

    pub fn ui_level(self, level: UILevel) -> Self {
        self.with_property(props::UI_LEVEL, &level.value().to_string())
    }

    /// Mark the session as disconnected from the engine
    pub fn deactivate(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_read_only(mut self, name: &str) -> Self {
        self.read_only.push(name.to_string());
        self
    }

    /// Build the session the host hands to a deferred action scheduled under
    /// `action`: only `CustomActionData` survives the transition.
    pub fn deferred_from(immediate: &dyn Session, action: &str) -> Self {
        MemorySession::new()
            .with_property(props::CUSTOM_ACTION_DATA, &immediate.property(action))
            .with_read_only(props::CUSTOM_ACTION_DATA)
    }
}

impl Session for MemorySession {
    fn property(&self, name: &str) -> String {
        self.properties.get(name).cloned().unwrap_or_default()
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        if !self.active {
            return Err(SessionError::Inactive);
        }
        if self.read_only.iter().any(|p| p == name) {
            return Err(SessionError::ReadOnly(name.to_string()));
        }
        self.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn log(&mut self, message: &str) {
        self.log.push(message.to_string());
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl PropertySource for MemorySession {
    fn lookup(&self, name: &str) -> Option<String> {
        self.properties.get(name).filter(|v| !v.is_empty()).cloned()
    }
}
