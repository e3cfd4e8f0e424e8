//! Install simulation scenarios
//!
//! A scenario describes a session, a dialog sequence, declarative event
//! handlers and a navigation script. Running it drives the full
//! immediate -> UI -> deferred flow against an in-memory session and reports
//! what happened at each step.

use crate::bridge::DeferredContext;
use crate::condition::Condition;
use crate::config::RuntimeConfig;
use crate::data::{self, DataBag, RUNTIME_DATA_PROPERTY};
use crate::dialogs::{DialogDescriptor, DialogKind, DialogRole, ManagedDialogs, ManagedUI};
use crate::events::SetupEvent;
use crate::project::{deferred_action_name, ManagedProject, CANCEL_REQUEST_HANDLER, INIT_RUNTIME};
use crate::session::{ActionResult, InstallMode, MemorySession, Session, SetupMode, UILevel};
use crate::shell::{ExitStatus, ShellState, UiOutcome, UiShell};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid scenario: {0}")]
    Invalid(String),
}

/// One step of a navigation script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NavStep {
    Next,
    Back,
    GoTo(usize),
    GoToKind(DialogKind),
    Last,
    Cancel,
    StartExecute,
    Progress(u8),
    ExecuteComplete,
}

impl TryFrom<String> for NavStep {
    type Error = ScenarioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for NavStep {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let step = s.trim().to_lowercase();
        if let Some(target) = step.strip_prefix("goto:") {
            return Ok(match target.parse::<usize>() {
                Ok(index) => NavStep::GoTo(index),
                Err(_) => NavStep::GoToKind(DialogKind::from(target)),
            });
        }
        if let Some(percent) = step.strip_prefix("progress:") {
            return percent
                .parse::<u8>()
                .map(NavStep::Progress)
                .map_err(|_| ScenarioError::Invalid(format!("Bad progress step: {}", s)));
        }
        match step.as_str() {
            "next" => Ok(NavStep::Next),
            "back" | "prev" => Ok(NavStep::Back),
            "last" => Ok(NavStep::Last),
            "cancel" => Ok(NavStep::Cancel),
            "start-execute" => Ok(NavStep::StartExecute),
            "execute-complete" | "complete" => Ok(NavStep::ExecuteComplete),
            _ => Err(ScenarioError::Invalid(format!("Unknown navigation step: {}", s))),
        }
    }
}

impl fmt::Display for NavStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavStep::Next => write!(f, "next"),
            NavStep::Back => write!(f, "back"),
            NavStep::GoTo(index) => write!(f, "goto:{}", index),
            NavStep::GoToKind(kind) => write!(f, "goto:{}", kind),
            NavStep::Last => write!(f, "last"),
            NavStep::Cancel => write!(f, "cancel"),
            NavStep::StartExecute => write!(f, "start-execute"),
            NavStep::Progress(percent) => write!(f, "progress:{}", percent),
            NavStep::ExecuteComplete => write!(f, "execute-complete"),
        }
    }
}

impl From<NavStep> for String {
    fn from(step: NavStep) -> Self {
        step.to_string()
    }
}

/// Dialog entry of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogSpec {
    pub kind: DialogKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_go_back: Option<bool>,

    /// Start the execute phase when shown (progress dialogs do by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_execute: Option<bool>,
}

impl DialogSpec {
    pub fn new(kind: DialogKind) -> Self {
        Self {
            kind,
            title: None,
            skip_if: None,
            can_go_back: None,
            start_execute: None,
        }
    }

    fn to_descriptor(&self) -> DialogDescriptor {
        let mut descriptor = DialogDescriptor::standard(self.kind.clone());
        if let Some(title) = &self.title {
            descriptor = descriptor.with_title(title);
        }
        if let Some(condition) = &self.skip_if {
            descriptor = descriptor.skip_if(condition.clone());
        }
        if let Some(can_go_back) = self.can_go_back {
            descriptor.can_go_back = can_go_back;
        }
        if self
            .start_execute
            .unwrap_or(self.kind == DialogKind::Progress)
        {
            descriptor = descriptor.on_render(|ctx| {
                ctx.start_execute();
                Ok(())
            });
        }
        descriptor
    }
}

/// Declarative event handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub event: SetupEvent,

    /// Bag entries the handler writes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set_data: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,

    /// Fail with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub mode: InstallMode,

    #[serde(default)]
    pub ui_level: UILevel,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Bag entries present before the runtime starts
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Install sequence; empty means the stock one
    #[serde(default)]
    pub dialogs: Vec<DialogSpec>,

    /// Maintenance sequence; empty means the stock one
    #[serde(default)]
    pub modify_dialogs: Vec<DialogSpec>,

    #[serde(default)]
    pub handlers: Vec<HandlerSpec>,

    #[serde(default)]
    pub navigation: Vec<NavStep>,

    /// Properties captured for deferred actions, overriding the config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_properties: Option<Vec<String>>,
}

/// Shell position after a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step: String,
    pub index: Option<usize>,
    pub dialog: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub mode: SetupMode,
    pub trace: Vec<TraceEntry>,
    pub outcome: Option<UiOutcome>,
    pub exit_status: ExitStatus,
    pub actions: Vec<ActionRecord>,
    pub deferred: Option<DeferredContext>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl Scenario {
    /// Load a scenario, choosing the format from the file extension
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let scenario: Self = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(ScenarioError::Invalid(format!(
                    "Unknown scenario file format: {}",
                    ext
                )))
            }
        };
        Ok(scenario)
    }

    /// Starter scenario used by `init`
    pub fn sample() -> Self {
        let mut licence = DialogSpec::new(DialogKind::Licence);
        licence.skip_if = Condition::parse("ALREADY_ACCEPTED = \"1\"").ok();

        Self {
            name: "Fresh install".to_string(),
            mode: InstallMode::Install,
            ui_level: UILevel::Full,
            properties: [
                ("INSTALLDIR", "C:\\Program Files\\My App"),
                ("ProductName", "My App"),
                ("ALREADY_ACCEPTED", "1"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            data: BTreeMap::new(),
            dialogs: vec![
                DialogSpec::new(DialogKind::Welcome),
                licence,
                DialogSpec::new(DialogKind::InstallDir),
                DialogSpec::new(DialogKind::Progress),
                DialogSpec::new(DialogKind::Exit),
            ],
            modify_dialogs: Vec::new(),
            handlers: vec![HandlerSpec {
                event: SetupEvent::Load,
                set_data: [("AppName".to_string(), "My App".to_string())]
                    .into_iter()
                    .collect(),
                result: None,
                fail: None,
                log: None,
            }],
            navigation: vec![
                NavStep::Next,
                NavStep::Next,
                NavStep::Progress(50),
                NavStep::ExecuteComplete,
                NavStep::Next,
            ],
            uses_properties: None,
        }
    }

    fn build_project(&self, config: &RuntimeConfig) -> ManagedProject {
        let mut config = config.clone();
        if let Some(keys) = &self.uses_properties {
            config.deferred_properties = keys.clone();
        }

        let stock = ManagedUI::default_ui();
        let ui = ManagedUI {
            install_dialogs: sequence(DialogRole::Install, &self.dialogs)
                .unwrap_or(stock.install_dialogs),
            modify_dialogs: sequence(DialogRole::Modify, &self.modify_dialogs)
                .unwrap_or(stock.modify_dialogs),
        };

        let mut project = ManagedProject::new(&self.name)
            .with_ui(ui)
            .with_config(config);
        for spec in &self.handlers {
            let spec = spec.clone();
            project.on(spec.event, move |args| {
                if let Some(message) = &spec.log {
                    args.log(message);
                }
                if let Some(message) = &spec.fail {
                    anyhow::bail!("{}", message);
                }
                args.data.extend(spec.set_data.clone());
                if let Some(result) = spec.result {
                    args.result = result;
                }
                Ok(())
            });
        }
        project
    }

    fn session(&self) -> MemorySession {
        let mut session = MemorySession::new()
            .install_mode(self.mode)
            .ui_level(self.ui_level);
        for (k, v) in &self.properties {
            session = session.with_property(k, v);
        }
        if !self.data.is_empty() {
            let bag: DataBag = self.data.clone().into_iter().collect();
            let merged = data::merge_replace(&session.property(RUNTIME_DATA_PROPERTY), &bag);
            session = session.with_property(RUNTIME_DATA_PROPERTY, &merged);
        }
        session
    }

    /// Run the scenario end to end
    pub fn run(&self, config: &RuntimeConfig) -> ScenarioReport {
        let project = self.build_project(config);
        let mut session = self.session();
        let mode = SetupMode::detect(&session);
        let mut actions = Vec::new();
        let mut trace = Vec::new();

        let init = record(
            &mut actions,
            INIT_RUNTIME,
            project.invoke_entry_point(INIT_RUNTIME, &mut session),
        );
        let load = record(
            &mut actions,
            "Load",
            project.invoke_entry_point("Load", &mut session),
        );
        if init.is_abort() || load.is_abort() {
            return self.report(mode, trace, None, ExitStatus::Failed, actions, None, Vec::new());
        }

        let mut shell = project.run_ui(Box::new(session));
        trace.push(snapshot(&shell, "show"));
        for step in &self.navigation {
            apply(&mut shell, step);
            trace.push(snapshot(&shell, &step.to_string()));
        }

        let outcome = shell.outcome();
        let exit_status = shell.exit_status();
        let errors = shell.errors().to_vec();
        let proceed = shell.execute_started()
            || matches!(outcome, Some(UiOutcome::Completed) | Some(UiOutcome::NotShown));
        let (mut session, _) = shell.into_parts();

        if !proceed {
            return self.report(mode, trace, outcome, exit_status, actions, None, errors);
        }

        let cancel = record(
            &mut actions,
            CANCEL_REQUEST_HANDLER,
            project.invoke_entry_point(CANCEL_REQUEST_HANDLER, session.as_mut()),
        );
        if cancel.is_abort() {
            return self.report(mode, trace, outcome, exit_status, actions, None, errors);
        }

        let before = record(
            &mut actions,
            "BeforeInstall",
            project.invoke_entry_point("BeforeInstall", session.as_mut()),
        );
        if before.is_abort() {
            return self.report(mode, trace, outcome, exit_status, actions, None, errors);
        }

        let blob = session.property(&deferred_action_name(SetupEvent::AfterInstall));
        let run = project.run_deferred(SetupEvent::AfterInstall, &blob);
        record(&mut actions, "AfterInstall", run.result);

        let deferred = DeferredContext {
            properties: run.session.properties().clone(),
            data: run.data,
        };
        self.report(mode, trace, outcome, exit_status, actions, Some(deferred), errors)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        mode: SetupMode,
        trace: Vec<TraceEntry>,
        outcome: Option<UiOutcome>,
        exit_status: ExitStatus,
        actions: Vec<ActionRecord>,
        deferred: Option<DeferredContext>,
        errors: Vec<String>,
    ) -> ScenarioReport {
        let success = deferred.is_some()
            && actions.iter().all(|a| !a.result.is_abort())
            && !matches!(outcome, Some(UiOutcome::Failed) | Some(UiOutcome::Cancelled));
        ScenarioReport {
            name: self.name.clone(),
            mode,
            trace,
            outcome,
            exit_status,
            actions,
            deferred,
            errors,
            success,
        }
    }
}

fn record(actions: &mut Vec<ActionRecord>, action: &str, result: ActionResult) -> ActionResult {
    actions.push(ActionRecord {
        action: action.to_string(),
        result,
    });
    result
}

fn sequence(role: DialogRole, specs: &[DialogSpec]) -> Option<ManagedDialogs> {
    if specs.is_empty() {
        return None;
    }
    let mut dialogs = ManagedDialogs::new(role);
    for spec in specs {
        dialogs.push(spec.to_descriptor());
    }
    Some(dialogs)
}

fn apply(shell: &mut UiShell, step: &NavStep) {
    match step {
        NavStep::Next => shell.go_next(),
        NavStep::Back => shell.go_prev(),
        NavStep::GoTo(index) => shell.go_to(*index),
        NavStep::GoToKind(kind) => shell.go_to_kind(kind),
        NavStep::Last => shell.go_to_last(),
        NavStep::Cancel => shell.cancel(),
        NavStep::StartExecute => shell.start_execute(),
        NavStep::Progress(percent) => shell.on_progress(*percent),
        NavStep::ExecuteComplete => shell.on_execute_complete(),
    }
}

fn snapshot(shell: &UiShell, step: &str) -> TraceEntry {
    TraceEntry {
        step: step.to_string(),
        index: shell.current_index(),
        dialog: shell.current_dialog().map(|d| d.kind.to_string()),
        state: match shell.state() {
            ShellState::Idle => "idle".to_string(),
            ShellState::Rendering(i) => format!("rendering({})", i),
            ShellState::Transitioning => "transitioning".to_string(),
            ShellState::Terminated(outcome) => format!("terminated({})", outcome),
        },
    }
}
