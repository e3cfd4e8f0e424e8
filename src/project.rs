//! Managed project: the custom action entry points the host engine invokes
//!
//! A typical install runs, in order:
//!
//! 1. `InitRuntime` - snapshot session properties into the data bag
//! 2. `Load` - immediate handlers
//! 3. the managed UI ([`ManagedProject::run_ui`])
//! 4. `BeforeInstall` - immediate handlers, then capture of the deferred payload
//! 5. `AfterInstall` - deferred handlers over the rehydrated payload
//!
//! `CancelRequestHandler` runs alongside the execute sequence and aborts it
//! once the user cancelled from the UI.

use crate::bridge::{capture_for_deferred, rehydrate_from_deferred, stage_environment, DeferredSession};
use crate::config::RuntimeConfig;
use crate::data::{DataBag, RUNTIME_DATA_PROPERTY};
use crate::dialogs::ManagedUI;
use crate::events::{EventRegistry, SetupEvent, SetupEventArgs};
use crate::session::{props, ActionResult, Session};
use crate::shell::UiShell;

pub const INIT_RUNTIME: &str = "InitRuntime";
pub const CANCEL_REQUEST_HANDLER: &str = "CancelRequestHandler";

/// Name of the deferred action scheduled for `event`; the immediate phase
/// stores the payload in a session property of the same name.
pub fn deferred_action_name(event: SetupEvent) -> String {
    format!("WixManaged_{}_Action", event)
}

/// Result of a deferred invocation
#[derive(Debug)]
pub struct DeferredRun {
    pub result: ActionResult,
    pub session: DeferredSession,
    pub data: DataBag,
}

#[derive(Debug)]
pub struct ManagedProject {
    pub name: String,
    pub ui: ManagedUI,
    pub events: EventRegistry,
    config: RuntimeConfig,
}

impl ManagedProject {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ui: ManagedUI::default_ui(),
            events: EventRegistry::new(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_ui(mut self, ui: ManagedUI) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.events
            .set_abort_on_error(config.abort_on_unhandled_exception);
        self.config = config;
        self
    }

    /// Runtime configuration; replace it through [`ManagedProject::with_config`]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shorthand for `events.subscribe`
    pub fn on<F>(&mut self, event: SetupEvent, handler: F) -> &mut Self
    where
        F: Fn(&mut SetupEventArgs<'_>) -> anyhow::Result<()> + 'static,
    {
        self.events.subscribe(event, handler);
        self
    }

    /// Snapshot the configured session properties into the data bag
    pub fn init_runtime(&self, session: &mut dyn Session) -> ActionResult {
        let mut snapshot = DataBag::new();
        for name in &self.config.session_serializable_properties {
            let value = session.property(name);
            if !value.is_empty() {
                snapshot.insert(name.as_str(), value);
            }
        }

        let mut data = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        data.merge_replace(&snapshot);

        match session.set_property(RUNTIME_DATA_PROPERTY, &data.serialize()) {
            Ok(()) => {
                log::debug!("Runtime initialized with {} value(s)", data.len());
                ActionResult::Success
            }
            Err(e) => {
                log::error!("Cannot initialize runtime data: {}", e);
                session.log(&format!("Cannot initialize runtime data: {}", e));
                ActionResult::Failure
            }
        }
    }

    /// Run the handlers of an immediate event against the live session
    pub fn invoke_immediate(&self, event: SetupEvent, session: &mut dyn Session) -> ActionResult {
        if event.is_deferred() {
            log::error!("{} only runs deferred", event);
            return ActionResult::Failure;
        }
        log::info!("Invoking {}", event);
        self.events.dispatch(event, session)
    }

    /// Capture the payload for a deferred event into the property named after
    /// its action
    pub fn schedule_deferred(&self, event: SetupEvent, session: &mut dyn Session) -> ActionResult {
        let action = deferred_action_name(event);
        let data = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        let blob = capture_for_deferred(&*session, &self.config.deferred_properties, &data);

        match session.set_property(&action, &blob) {
            Ok(()) => {
                log::debug!("Scheduled {} ({} bytes)", action, blob.len());
                ActionResult::Success
            }
            Err(e) => {
                log::error!("Cannot schedule {}: {}", action, e);
                ActionResult::Failure
            }
        }
    }

    /// Run a deferred event over a payload
    pub fn run_deferred(&self, event: SetupEvent, blob: &str) -> DeferredRun {
        let context = rehydrate_from_deferred(blob);
        if self.config.stage_environment {
            stage_environment(&context.properties);
        }
        if self.config.is_elevated(event) {
            log::info!("{} is marked elevated; running in-process", event);
        }

        let data = context.data.clone();
        let mut session = DeferredSession::new(context);
        let outcome = self.events.dispatch_with(event, &mut session, data);

        DeferredRun {
            result: outcome.result,
            session,
            data: outcome.data,
        }
    }

    /// Run a deferred event from the host's deferred session, which exposes
    /// the payload as `CustomActionData`
    pub fn invoke_deferred(&self, event: SetupEvent, session: &mut dyn Session) -> ActionResult {
        if !event.is_deferred() {
            log::error!("{} does not run deferred", event);
            return ActionResult::Failure;
        }
        let blob = session.property(props::CUSTOM_ACTION_DATA);
        let run = self.run_deferred(event, &blob);
        for line in run.session.log_lines() {
            session.log(line);
        }
        run.result
    }

    /// Abort the execute sequence once the UI raised a cancel request
    pub fn cancel_request_handler(&self, session: &dyn Session) -> ActionResult {
        if session.property(props::CANCEL_REQUEST).is_empty() {
            ActionResult::Success
        } else {
            log::info!("Cancel requested from the UI");
            ActionResult::UserExit
        }
    }

    /// Show the managed UI for a session
    pub fn run_ui(&self, session: Box<dyn Session>) -> UiShell {
        let mut shell = UiShell::for_session(session, &self.ui);
        shell.show(&self.events);
        shell
    }

    /// Dispatch a host entry point by name
    pub fn invoke_entry_point(&self, name: &str, session: &mut dyn Session) -> ActionResult {
        match name {
            INIT_RUNTIME => self.init_runtime(session),
            CANCEL_REQUEST_HANDLER => self.cancel_request_handler(session),
            "Load" => self.invoke_immediate(SetupEvent::Load, session),
            "BeforeInstall" => {
                let result = self.invoke_immediate(SetupEvent::BeforeInstall, session);
                if result.is_abort() {
                    return result;
                }
                match self.schedule_deferred(SetupEvent::AfterInstall, session) {
                    ActionResult::Success => result,
                    failed => failed,
                }
            }
            "AfterInstall" => self.invoke_deferred(SetupEvent::AfterInstall, session),
            other => {
                log::error!("Unknown entry point '{}'", other);
                session.log(&format!("Unknown entry point '{}'", other));
                ActionResult::Failure
            }
        }
    }

    pub fn entry_points() -> &'static [&'static str] {
        &[
            INIT_RUNTIME,
            "Load",
            "BeforeInstall",
            "AfterInstall",
            CANCEL_REQUEST_HANDLER,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InstallMode, MemorySession};
    use crate::shell::UiOutcome;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_init_runtime_snapshots_properties() {
        let project = ManagedProject::new("App");
        let mut session = MemorySession::new()
            .with_product_info("My Product", "1.0", "Corp")
            .install_mode(InstallMode::Modify)
            .with_property(RUNTIME_DATA_PROPERTY, "Existing=1");

        assert_eq!(project.init_runtime(&mut session), ActionResult::Success);
        let data = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        assert_eq!(data.value("ProductName"), "My Product");
        assert_eq!(data.value("Installed"), "00:00:00");
        assert_eq!(data.value("Existing"), "1");
        assert!(!data.contains_key("REMOVE"));
    }

    #[test]
    fn test_init_runtime_fails_on_inactive_session() {
        let project = ManagedProject::new("App");
        let mut session = MemorySession::new().deactivate();
        assert_eq!(project.init_runtime(&mut session), ActionResult::Failure);
    }

    #[test]
    fn test_invoke_immediate_rejects_deferred_event() {
        let project = ManagedProject::new("App");
        let mut session = MemorySession::new();
        assert_eq!(
            project.invoke_immediate(SetupEvent::AfterInstall, &mut session),
            ActionResult::Failure
        );
    }

    #[test]
    fn test_schedule_and_invoke_deferred() {
        let mut project = ManagedProject::new("App");
        let seen = Rc::new(RefCell::new(String::new()));
        let s = seen.clone();
        project.on(SetupEvent::AfterInstall, move |args| {
            *s.borrow_mut() = format!("{}|{}", args.install_dir(), args.data.value("AppName"));
            Ok(())
        });

        let mut immediate = MemorySession::new()
            .with_install_dir("C:\\App")
            .with_property(RUNTIME_DATA_PROPERTY, "AppName=My App");
        assert_eq!(
            project.schedule_deferred(SetupEvent::AfterInstall, &mut immediate),
            ActionResult::Success
        );

        let action = deferred_action_name(SetupEvent::AfterInstall);
        let mut deferred = MemorySession::deferred_from(&immediate, &action);
        assert_eq!(
            project.invoke_deferred(SetupEvent::AfterInstall, &mut deferred),
            ActionResult::Success
        );
        assert_eq!(*seen.borrow(), "C:\\App|My App");
    }

    #[test]
    fn test_deferred_logs_reach_host() {
        let mut project = ManagedProject::new("App");
        project.on(SetupEvent::AfterInstall, |args| {
            args.log("configured");
            Ok(())
        });
        let mut deferred = MemorySession::new();
        project.invoke_deferred(SetupEvent::AfterInstall, &mut deferred);
        assert_eq!(deferred.log, vec!["configured".to_string()]);
    }

    #[test]
    fn test_deferred_with_garbage_payload_still_runs() {
        let mut project = ManagedProject::new("App");
        project.on(SetupEvent::AfterInstall, |args| {
            anyhow::ensure!(args.data.is_empty(), "expected empty bag");
            Ok(())
        });
        let run = project.run_deferred(SetupEvent::AfterInstall, "garbage");
        assert_eq!(run.result, ActionResult::Success);
        assert!(run.session.properties().is_empty());
    }

    #[test]
    fn test_cancel_request_handler() {
        let project = ManagedProject::new("App");
        let session = MemorySession::new();
        assert_eq!(project.cancel_request_handler(&session), ActionResult::Success);
        let session = MemorySession::new().with_property(props::CANCEL_REQUEST, "1");
        assert_eq!(project.cancel_request_handler(&session), ActionResult::UserExit);
    }

    #[test]
    fn test_config_controls_abort() {
        let mut config = RuntimeConfig::default();
        config.abort_on_unhandled_exception = false;
        let mut project = ManagedProject::new("App").with_config(config);
        project.on(SetupEvent::Load, |_| anyhow::bail!("tolerated"));
        let mut session = MemorySession::new();
        assert_eq!(
            project.invoke_immediate(SetupEvent::Load, &mut session),
            ActionResult::Success
        );
    }

    #[test]
    fn test_replacing_config_rearms_abort() {
        let mut lenient = RuntimeConfig::default();
        lenient.abort_on_unhandled_exception = false;
        let mut project = ManagedProject::new("App")
            .with_config(lenient)
            .with_config(RuntimeConfig::default());
        project.on(SetupEvent::Load, |_| anyhow::bail!("fatal"));
        let mut session = MemorySession::new();
        assert!(project.config().abort_on_unhandled_exception);
        assert_eq!(
            project.invoke_immediate(SetupEvent::Load, &mut session),
            ActionResult::Failure
        );
    }

    #[test]
    fn test_before_install_entry_point_schedules_after_install() {
        let mut project = ManagedProject::new("App");
        project.on(SetupEvent::BeforeInstall, |args| {
            args.data.insert("Stage", "before");
            Ok(())
        });
        let mut session = MemorySession::new().with_install_dir("C:\\App");
        assert_eq!(
            project.invoke_entry_point("BeforeInstall", &mut session),
            ActionResult::Success
        );
        let blob = session.property(&deferred_action_name(SetupEvent::AfterInstall));
        let run = project.run_deferred(SetupEvent::AfterInstall, &blob);
        assert_eq!(run.data.value("Stage"), "before");
        assert_eq!(run.session.property("INSTALLDIR"), "C:\\App");
    }

    #[test]
    fn test_before_install_abort_skips_scheduling() {
        let mut project = ManagedProject::new("App");
        project.on(SetupEvent::BeforeInstall, |args| {
            args.result = ActionResult::UserExit;
            Ok(())
        });
        let mut session = MemorySession::new();
        assert_eq!(
            project.invoke_entry_point("BeforeInstall", &mut session),
            ActionResult::UserExit
        );
        assert_eq!(
            session.property(&deferred_action_name(SetupEvent::AfterInstall)),
            ""
        );
    }

    #[test]
    fn test_unknown_entry_point() {
        let project = ManagedProject::new("App");
        let mut session = MemorySession::new();
        assert_eq!(
            project.invoke_entry_point("Bogus", &mut session),
            ActionResult::Failure
        );
        assert!(ManagedProject::entry_points().contains(&"CancelRequestHandler"));
    }

    #[test]
    fn test_run_ui_uninstall_not_shown() {
        let project = ManagedProject::new("App");
        let session = MemorySession::new().install_mode(InstallMode::Remove);
        let shell = project.run_ui(Box::new(session));
        assert_eq!(shell.outcome(), Some(UiOutcome::NotShown));
    }
}
