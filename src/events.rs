//! Setup lifecycle events
//!
//! Handlers subscribe to a [`SetupEvent`] and receive a fresh
//! [`SetupEventArgs`] per invocation. A handler error or panic never escapes
//! dispatch: it is reported to the unhandled-exception observers and mapped
//! to [`ActionResult::Failure`].

use crate::condition::PropertySource;
use crate::data::{DataBag, RUNTIME_DATA_PROPERTY};
use crate::session::{self, props, ActionResult, Session, SetupMode};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetupEvent {
    /// Immediate, before the UI sequence
    Load,
    /// UI shell created, before the first dialog
    #[serde(rename = "ui-initialized")]
    UIInitialized,
    /// First dialog shown
    #[serde(rename = "ui-loaded")]
    UILoaded,
    /// Immediate, right before the execute sequence
    BeforeInstall,
    /// Deferred, after files are installed
    AfterInstall,
}

impl SetupEvent {
    pub fn all() -> &'static [SetupEvent] {
        &[
            SetupEvent::Load,
            SetupEvent::UIInitialized,
            SetupEvent::UILoaded,
            SetupEvent::BeforeInstall,
            SetupEvent::AfterInstall,
        ]
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, SetupEvent::AfterInstall)
    }
}

impl fmt::Display for SetupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupEvent::Load => "Load",
            SetupEvent::UIInitialized => "UIInitialized",
            SetupEvent::UILoaded => "UILoaded",
            SetupEvent::BeforeInstall => "BeforeInstall",
            SetupEvent::AfterInstall => "AfterInstall",
        };
        write!(f, "{}", name)
    }
}

/// Arguments handed to a single handler invocation
pub struct SetupEventArgs<'a> {
    pub event: SetupEvent,
    pub session: &'a mut dyn Session,
    pub data: DataBag,
    pub result: ActionResult,
    pub deferred: bool,
}

impl<'a> SetupEventArgs<'a> {
    pub fn new(event: SetupEvent, session: &'a mut dyn Session, data: DataBag) -> Self {
        Self {
            event,
            session,
            data,
            result: ActionResult::Success,
            deferred: event.is_deferred(),
        }
    }

    /// Session property, falling back to the bag snapshot
    pub fn property(&self, name: &str) -> String {
        self.lookup(name).unwrap_or_default()
    }

    pub fn install_dir(&self) -> String {
        self.property(props::INSTALL_DIR)
    }

    pub fn product_name(&self) -> String {
        self.property(props::PRODUCT_NAME)
    }

    pub fn ui_level(&self) -> i32 {
        self.property(props::UI_LEVEL).parse().unwrap_or(0)
    }

    /// Whether the engine shows a full or reduced UI
    pub fn is_ui_enabled(&self) -> bool {
        self.ui_level() > 3
    }

    /// Basic, reduced or no UI
    pub fn is_ui_suppressed(&self) -> bool {
        self.ui_level() <= 4
    }

    pub fn is_managed_ui_session(&self) -> bool {
        self.lookup(props::MANAGED_UI).is_some()
    }

    pub fn mode(&self) -> SetupMode {
        SetupMode::detect(self)
    }

    pub fn is_installed(&self) -> bool {
        session::is_installed(self)
    }

    pub fn is_installing(&self) -> bool {
        session::is_installing(self)
    }

    pub fn is_uninstalling(&self) -> bool {
        session::is_uninstalling(self)
    }

    pub fn is_repairing(&self) -> bool {
        session::is_repairing(self)
    }

    pub fn is_modifying(&self) -> bool {
        session::is_modifying(self)
    }

    pub fn is_upgrading(&self) -> bool {
        session::is_upgrading(self)
    }

    pub fn log(&mut self, message: &str) {
        self.session.log(message);
    }
}

impl PropertySource for SetupEventArgs<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.session.lookup(name).or_else(|| self.data.lookup(name))
    }
}

/// Payload for unhandled-exception observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEventArgs {
    pub event: SetupEvent,
    pub message: String,
}

pub type SetupEventHandler = Box<dyn Fn(&mut SetupEventArgs<'_>) -> anyhow::Result<()>>;
pub type ExceptionHandler = Box<dyn Fn(&ExceptionEventArgs)>;

/// Outcome of dispatching one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub result: ActionResult,
    pub data: DataBag,
    pub handlers_run: usize,
}

/// Subscribers to setup events
pub struct EventRegistry {
    handlers: HashMap<SetupEvent, Vec<SetupEventHandler>>,
    exception_handlers: Vec<ExceptionHandler>,
    abort_on_error: bool,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            exception_handlers: Vec::new(),
            abort_on_error: true,
        }
    }

    /// Whether a failing handler turns the result into `Failure`
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    pub fn set_abort_on_error(&mut self, abort: bool) {
        self.abort_on_error = abort;
    }

    pub fn subscribe<F>(&mut self, event: SetupEvent, handler: F) -> &mut Self
    where
        F: Fn(&mut SetupEventArgs<'_>) -> anyhow::Result<()> + 'static,
    {
        self.handlers.entry(event).or_default().push(Box::new(handler));
        self
    }

    pub fn on_unhandled_exception<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ExceptionEventArgs) + 'static,
    {
        self.exception_handlers.push(Box::new(handler));
        self
    }

    pub fn handler_count(&self, event: SetupEvent) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    /// Dispatch against a live session: the bag is read from and written back
    /// to the session's runtime-data property.
    pub fn dispatch(&self, event: SetupEvent, session: &mut dyn Session) -> ActionResult {
        let data = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        let outcome = self.dispatch_with(event, session, data);

        if session.is_active() {
            if let Err(e) = session.set_property(RUNTIME_DATA_PROPERTY, &outcome.data.serialize()) {
                log::debug!("Runtime data not written back after {}: {}", event, e);
            }
        }
        outcome.result
    }

    /// Run the handlers of `event` in subscription order over `data`
    pub fn dispatch_with(
        &self,
        event: SetupEvent,
        session: &mut dyn Session,
        mut data: DataBag,
    ) -> Dispatch {
        let mut result = ActionResult::Success;
        let mut handlers_run = 0;

        for handler in self.handlers.get(&event).into_iter().flatten() {
            let mut args = SetupEventArgs::new(event, session, data.clone());
            args.result = result;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut args)));
            handlers_run += 1;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };

            data = args.data;
            result = args.result;

            if let Some(message) = failure {
                log::error!("{} handler failed: {}", event, message);
                session.log(&format!("{} handler failed: {}", event, message));
                self.notify_exception(&ExceptionEventArgs { event, message });
                if self.abort_on_error {
                    result = ActionResult::Failure;
                }
                break;
            }

            if result.is_abort() {
                log::info!("{} handler returned {}, stopping", event, result);
                break;
            }
        }

        log::debug!("{} dispatched to {} handler(s): {}", event, handlers_run, result);
        Dispatch {
            result,
            data,
            handlers_run,
        }
    }

    fn notify_exception(&self, args: &ExceptionEventArgs) {
        for observer in &self.exception_handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(args))).is_err() {
                log::warn!("Unhandled-exception observer panicked");
            }
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.handlers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventRegistry")
            .field("handlers", &counts)
            .field("exception_handlers", &self.exception_handlers.len())
            .field("abort_on_error", &self.abort_on_error)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InstallMode, MemorySession};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_no_handlers_is_success() {
        let registry = EventRegistry::new();
        let mut session = MemorySession::new();
        assert_eq!(registry.dispatch(SetupEvent::Load, &mut session), ActionResult::Success);
    }

    #[test]
    fn test_handlers_run_in_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut registry = EventRegistry::new();
        for i in 0..3 {
            let order = order.clone();
            registry.subscribe(SetupEvent::Load, move |_| {
                order.borrow_mut().push(i);
                Ok(())
            });
        }
        let mut session = MemorySession::new();
        registry.dispatch(SetupEvent::Load, &mut session);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_user_exit_stops_remaining_handlers() {
        let calls = Rc::new(RefCell::new(0));
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::BeforeInstall, |args| {
            args.result = ActionResult::UserExit;
            Ok(())
        });
        let c = calls.clone();
        registry.subscribe(SetupEvent::BeforeInstall, move |_| {
            *c.borrow_mut() += 1;
            Ok(())
        });

        let mut session = MemorySession::new();
        let result = registry.dispatch(SetupEvent::BeforeInstall, &mut session);
        assert_eq!(result, ActionResult::UserExit);
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_result_carries_across_handlers() {
        let mut registry = EventRegistry::new();
        registry
            .subscribe(SetupEvent::UIInitialized, |args| {
                args.result = ActionResult::SkipRemainingActions;
                Ok(())
            })
            .subscribe(SetupEvent::UIInitialized, |args| {
                args.data.insert("Second", "ran");
                Ok(())
            });

        let mut session = MemorySession::new();
        let outcome =
            registry.dispatch_with(SetupEvent::UIInitialized, &mut session, DataBag::new());
        assert_eq!(outcome.result, ActionResult::SkipRemainingActions);
        assert_eq!(outcome.handlers_run, 2);
        assert_eq!(outcome.data.value("Second"), "ran");
    }

    #[test]
    fn test_error_maps_to_failure_and_notifies() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::Load, |_| anyhow::bail!("boom"));
        let s = seen.clone();
        registry.on_unhandled_exception(move |e| s.borrow_mut().push(e.clone()));

        let mut session = MemorySession::new();
        let result = registry.dispatch(SetupEvent::Load, &mut session);

        assert_eq!(result, ActionResult::Failure);
        assert_eq!(
            *seen.borrow(),
            vec![ExceptionEventArgs {
                event: SetupEvent::Load,
                message: "boom".to_string()
            }]
        );
        assert!(session.log.iter().any(|l| l.contains("boom")));
    }

    #[test]
    fn test_panic_is_contained() {
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::Load, |_| panic!("kaboom"));
        let seen = Rc::new(RefCell::new(String::new()));
        let s = seen.clone();
        registry.on_unhandled_exception(move |e| *s.borrow_mut() = e.message.clone());

        let mut session = MemorySession::new();
        let result = registry.dispatch(SetupEvent::Load, &mut session);
        assert_eq!(result, ActionResult::Failure);
        assert_eq!(*seen.borrow(), "kaboom");
    }

    #[test]
    fn test_error_without_abort_keeps_result() {
        let mut registry = EventRegistry::new().abort_on_error(false);
        registry.subscribe(SetupEvent::Load, |_| anyhow::bail!("ignored"));
        let mut session = MemorySession::new();
        assert_eq!(registry.dispatch(SetupEvent::Load, &mut session), ActionResult::Success);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::Load, |_| anyhow::bail!("first"));
        registry.on_unhandled_exception(|_| panic!("observer"));
        let mut session = MemorySession::new();
        assert_eq!(registry.dispatch(SetupEvent::Load, &mut session), ActionResult::Failure);
    }

    #[test]
    fn test_bag_changes_are_written_back() {
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::Load, |args| {
            args.data.insert("AppName", "My App");
            Ok(())
        });
        registry.subscribe(SetupEvent::Load, |args| {
            let name = args.data.value("AppName").to_string();
            args.data.insert("Seen", name);
            Ok(())
        });

        let mut session = MemorySession::new().with_property(RUNTIME_DATA_PROPERTY, "Existing=1");
        registry.dispatch(SetupEvent::Load, &mut session);

        let bag = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        assert_eq!(bag.value("Existing"), "1");
        assert_eq!(bag.value("AppName"), "My App");
        assert_eq!(bag.value("Seen"), "My App");
    }

    #[test]
    fn test_inactive_session_is_not_written() {
        let mut registry = EventRegistry::new();
        registry.subscribe(SetupEvent::AfterInstall, |args| {
            args.data.insert("k", "v");
            Ok(())
        });
        let mut session = MemorySession::new().deactivate();
        assert_eq!(
            registry.dispatch(SetupEvent::AfterInstall, &mut session),
            ActionResult::Success
        );
        assert_eq!(session.property(RUNTIME_DATA_PROPERTY), "");
    }

    #[test]
    fn test_args_mode_helpers_use_bag_snapshot() {
        let mut session = MemorySession::new();
        let snapshot = MemorySession::new().install_mode(InstallMode::Repair);
        let data: DataBag = snapshot.properties.clone().into_iter().collect();
        let args = SetupEventArgs::new(SetupEvent::AfterInstall, &mut session, data);
        assert!(args.is_repairing());
        assert!(args.deferred);
        assert_eq!(args.mode(), SetupMode::Repairing);
    }

    #[test]
    fn test_args_ui_level() {
        let mut session = MemorySession::new().with_property("UILevel", "5");
        let args = SetupEventArgs::new(SetupEvent::Load, &mut session, DataBag::new());
        assert!(args.is_ui_enabled());
        assert!(!args.is_ui_suppressed());
        assert!(!args.is_managed_ui_session());
    }
}
