//! UI shell and navigation engine
//!
//! The shell owns a dialog sequence and a cursor into it. Navigation is
//! strictly sequential: every call reads the sequence afresh, applies skip
//! predicates, renders the landing dialog and notifies change hooks once per
//! index change. The shell ends in exactly one terminal [`UiOutcome`].

use crate::data::{DataBag, RUNTIME_DATA_PROPERTY};
use crate::dialogs::{
    DialogContext, DialogDescriptor, DialogKind, ExecuteNotice, ManagedDialogs, ManagedUI,
    SequenceEdit,
};
use crate::events::{panic_message, EventRegistry, SetupEvent};
use crate::session::{props, ActionResult, Session, SetupMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// How the dialog sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UiOutcome {
    Completed,
    Cancelled,
    Failed,
    /// No managed UI for this session (uninstall, or an empty sequence)
    NotShown,
}

impl fmt::Display for UiOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiOutcome::Completed => write!(f, "completed"),
            UiOutcome::Cancelled => write!(f, "cancelled"),
            UiOutcome::Failed => write!(f, "failed"),
            UiOutcome::NotShown => write!(f, "not shown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShellState {
    Idle,
    Rendering(usize),
    Transitioning,
    Terminated(UiOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Forward,
    Backward,
    Jump,
}

/// Navigation override returned by a dialog-changed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Stay,
    Next,
    Prev,
    GoTo(usize),
    Cancel,
}

/// Current-dialog change notification
pub struct DialogChange<'a> {
    pub index: usize,
    pub previous: Option<usize>,
    pub direction: Direction,
    pub dialog: &'a DialogDescriptor,
    pub session: &'a dyn Session,
    pub data: &'a DataBag,
}

pub type ChangedHook = Box<dyn FnMut(&DialogChange<'_>) -> HookAction>;
pub type ExecuteStarter = Box<dyn FnMut(&mut dyn Session)>;

/// Completion status shown by the exit dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitStatus {
    Success,
    Interrupted,
    Failed,
}

impl ExitStatus {
    pub fn title(&self) -> &'static str {
        match self {
            ExitStatus::Success => "Setup completed successfully",
            ExitStatus::Interrupted => "Setup was interrupted",
            ExitStatus::Failed => "Setup ended prematurely",
        }
    }
}

/// Pick the dialog sequence for a session's setup mode
pub fn select_sequence(ui: &ManagedUI, session: &dyn Session) -> ManagedDialogs {
    let mode = SetupMode::detect(session);
    match ui.sequence_for(mode) {
        Some(dialogs) => dialogs.clone(),
        None => {
            log::info!("No managed UI sequence for {} session", mode);
            ManagedDialogs::default()
        }
    }
}

pub struct UiShell {
    session: Box<dyn Session>,
    data: DataBag,
    dialogs: ManagedDialogs,
    state: ShellState,
    current: Option<usize>,
    /// Index navigation is leaving, kept in step with sequence edits
    entered_from: Option<usize>,
    visited: Vec<usize>,
    changed_hooks: Vec<ChangedHook>,
    execute_starter: Option<ExecuteStarter>,
    execute_started: bool,
    execute_complete: bool,
    user_interrupted: bool,
    errors: Vec<String>,
    redirects: usize,
}

impl UiShell {
    pub fn new(session: Box<dyn Session>, dialogs: ManagedDialogs) -> Self {
        let data = DataBag::deserialize(&session.property(RUNTIME_DATA_PROPERTY));
        Self {
            session,
            data,
            dialogs,
            state: ShellState::Idle,
            current: None,
            entered_from: None,
            visited: Vec::new(),
            changed_hooks: Vec::new(),
            execute_starter: None,
            execute_started: false,
            execute_complete: false,
            user_interrupted: false,
            errors: Vec::new(),
            redirects: 0,
        }
    }

    /// Shell over the sequence matching the session's setup mode
    pub fn for_session(session: Box<dyn Session>, ui: &ManagedUI) -> Self {
        let dialogs = select_sequence(ui, session.as_ref());
        Self::new(session, dialogs)
    }

    pub fn on_current_dialog_changed<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&DialogChange<'_>) -> HookAction + 'static,
    {
        self.changed_hooks.push(Box::new(hook));
        self
    }

    /// Callback invoked when the execute phase starts
    pub fn on_start_execute<F>(&mut self, starter: F) -> &mut Self
    where
        F: FnMut(&mut dyn Session) + 'static,
    {
        self.execute_starter = Some(Box::new(starter));
        self
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn outcome(&self) -> Option<UiOutcome> {
        match self.state {
            ShellState::Terminated(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ShellState::Terminated(_))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_dialog(&self) -> Option<&DialogDescriptor> {
        self.current.and_then(|i| self.dialogs.get(i))
    }

    /// Indices rendered so far, in order
    pub fn visited(&self) -> &[usize] {
        &self.visited
    }

    pub fn dialogs(&self) -> &ManagedDialogs {
        &self.dialogs
    }

    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    pub fn data(&self) -> &DataBag {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataBag {
        &mut self.data
    }

    pub fn into_parts(self) -> (Box<dyn Session>, DataBag) {
        (self.session, self.data)
    }

    /// Start the UI: raise `UIInitialized`, position on the first dialog and
    /// raise `UILoaded`.
    pub fn show(&mut self, events: &EventRegistry) {
        if self.state != ShellState::Idle {
            log::warn!("Shell already started ({:?})", self.state);
            return;
        }
        if self.dialogs.is_empty() {
            self.terminate(UiOutcome::NotShown);
            return;
        }

        if let Err(e) = self.session.set_property(props::MANAGED_UI, "1") {
            log::debug!("Cannot flag managed UI session: {}", e);
        }
        self.sync_data();

        let result = events.dispatch(SetupEvent::UIInitialized, self.session.as_mut());
        self.reload_data();
        self.redirects = 0;

        match result {
            ActionResult::Failure => {
                self.session.log(&format!("UIInitialized returned {}", result));
                self.report_error("UI initialization failed");
                self.terminate(UiOutcome::Failed);
                return;
            }
            ActionResult::SkipRemainingActions => {
                let target = self
                    .dialogs
                    .position_of(&DialogKind::Progress)
                    .unwrap_or(self.dialogs.len() - 1);
                self.step_goto(target);
            }
            ActionResult::UserExit => {
                self.user_interrupted = true;
                self.step_goto(self.dialogs.len() - 1);
            }
            ActionResult::Success => self.step_next(),
        }

        let loaded = events.dispatch(SetupEvent::UILoaded, self.session.as_mut());
        if loaded != ActionResult::Success {
            self.session.log(&format!("UILoaded returned {}", loaded));
        }
        self.reload_data();
    }

    pub fn go_next(&mut self) {
        self.redirects = 0;
        self.step_next();
    }

    pub fn go_prev(&mut self) {
        self.redirects = 0;
        self.step_prev();
    }

    /// Jump to `index`; out-of-range targets behave like `go_next`
    pub fn go_to(&mut self, index: usize) {
        self.redirects = 0;
        self.step_goto(index);
    }

    /// Jump to the first dialog of `kind`; no-op when absent
    pub fn go_to_kind(&mut self, kind: &DialogKind) {
        match self.dialogs.position_of(kind) {
            Some(index) => self.go_to(index),
            None => log::debug!("No {} dialog in sequence", kind),
        }
    }

    pub fn go_to_last(&mut self) {
        if let Some(last) = self.dialogs.len().checked_sub(1) {
            self.go_to(last);
        }
    }

    /// End the sequence as cancelled. Raises the cancel request when the
    /// execute phase is running.
    pub fn cancel(&mut self) {
        if self.is_terminated() {
            return;
        }
        if self.execute_started && !self.execute_complete {
            self.user_interrupted = true;
            if let Err(e) = self.session.set_property(props::CANCEL_REQUEST, "1") {
                log::warn!("Cannot raise cancel request: {}", e);
            }
        }
        self.terminate(UiOutcome::Cancelled);
    }

    /// Begin the execute phase (once)
    pub fn start_execute(&mut self) {
        if self.execute_started {
            return;
        }
        self.execute_started = true;

        let install_dir = self.session.property(props::INSTALL_DIR);
        if !install_dir.is_empty() {
            self.data.insert(props::INSTALL_DIR, install_dir);
        }
        self.sync_data();

        if let Some(starter) = self.execute_starter.as_mut() {
            starter(self.session.as_mut());
        }
        self.notify_execute(ExecuteNotice::Started);
    }

    pub fn on_progress(&mut self, percent: u8) {
        self.notify_execute(ExecuteNotice::Progress(percent.min(100)));
    }

    /// The engine finished executing; a progress dialog moves on to the next
    pub fn on_execute_complete(&mut self) {
        self.execute_complete = true;
        self.notify_execute(ExecuteNotice::Complete);
        let on_progress = self
            .current_dialog()
            .is_some_and(|d| d.kind == DialogKind::Progress);
        if on_progress && !self.is_terminated() {
            self.go_next();
        }
    }

    pub fn report_error(&mut self, message: &str) {
        log::error!("{}", message);
        self.errors.push(message.to_string());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn error_detected(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn user_interrupted(&self) -> bool {
        self.user_interrupted
    }

    pub fn execute_started(&self) -> bool {
        self.execute_started
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.user_interrupted {
            ExitStatus::Interrupted
        } else if self.error_detected() {
            ExitStatus::Failed
        } else {
            ExitStatus::Success
        }
    }

    /// Insert a dialog between navigation calls
    pub fn insert_dialog(&mut self, index: usize, descriptor: DialogDescriptor) {
        self.apply_edit(SequenceEdit::Insert(index, descriptor));
    }

    /// Remove a dialog between navigation calls; the current one cannot be removed
    pub fn remove_dialog(&mut self, index: usize) {
        self.apply_edit(SequenceEdit::Remove(index));
    }

    fn step_next(&mut self) {
        if self.is_terminated() {
            return;
        }
        let from = self.current.map_or(0, |i| i + 1);
        match (from..self.dialogs.len()).find(|&i| !self.is_skipped(i)) {
            Some(index) => self.enter(index, Direction::Forward),
            None => {
                log::debug!("Reached end of dialog sequence");
                self.terminate(UiOutcome::Completed);
            }
        }
    }

    fn step_prev(&mut self) {
        if self.is_terminated() {
            return;
        }
        let Some(current) = self.current else {
            return;
        };
        if !self.dialogs.get(current).is_some_and(|d| d.can_go_back) {
            log::debug!("Dialog {} does not allow going back", current);
            return;
        }
        let upper = current.min(self.dialogs.len());
        match (0..upper).rev().find(|&i| !self.is_skipped(i)) {
            Some(index) => self.enter(index, Direction::Backward),
            None => log::debug!("No earlier dialog to go back to"),
        }
    }

    fn step_goto(&mut self, index: usize) {
        if self.is_terminated() {
            return;
        }
        if index < self.dialogs.len() {
            self.enter(index, Direction::Jump);
        } else {
            log::warn!(
                "Dialog index {} out of range ({} dialogs), moving next",
                index,
                self.dialogs.len()
            );
            self.step_next();
        }
    }

    fn is_skipped(&self, index: usize) -> bool {
        let skipped = self
            .dialogs
            .get(index)
            .is_some_and(|d| d.should_skip(self.session.as_ref(), &self.data));
        if skipped {
            log::debug!("Skipping dialog {}", index);
        }
        skipped
    }

    fn enter(&mut self, index: usize, direction: Direction) {
        self.entered_from = self.current;
        self.state = ShellState::Transitioning;
        self.current = Some(index);
        self.visited.push(index);

        self.render(index);
        let previous = self.entered_from.take();
        if self.is_terminated() {
            return;
        }

        let index = self.current.unwrap_or(index);
        self.state = ShellState::Rendering(index);

        if previous != Some(index) {
            self.sync_data();
            let action = self.notify_changed(index, previous, direction);
            self.follow(action);
        }
    }

    fn render(&mut self, index: usize) {
        let Some(descriptor) = self.dialogs.get(index) else {
            return;
        };
        let Some(render) = descriptor.render.clone() else {
            return;
        };
        let kind = descriptor.kind.clone();

        let mut ctx = DialogContext::new(index, kind, self.session.as_mut(), &mut self.data);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| render(&mut ctx)));
        let edits = std::mem::take(&mut ctx.edits);
        let start_execute = ctx.start_execute;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };
        if let Some(message) = failure {
            self.session
                .log(&format!("Dialog {} failed to render: {}", index, message));
            self.report_error(&format!("Dialog {} failed to render: {}", index, message));
            self.terminate(UiOutcome::Failed);
            return;
        }

        for edit in edits {
            self.apply_edit(edit);
        }
        if start_execute {
            self.start_execute();
        }
    }

    fn apply_edit(&mut self, edit: SequenceEdit) {
        match edit {
            SequenceEdit::Insert(index, descriptor) => {
                let at = self.dialogs.insert(index, descriptor);
                self.current = self.current.map(|i| if at <= i { i + 1 } else { i });
                self.entered_from = self.entered_from.map(|i| if at <= i { i + 1 } else { i });
            }
            SequenceEdit::Remove(index) => {
                if self.current == Some(index) {
                    log::warn!("Refusing to remove the current dialog ({})", index);
                    return;
                }
                if self.dialogs.remove(index).is_none() {
                    log::warn!("Cannot remove dialog {}: out of range", index);
                    return;
                }
                self.current = self.current.map(|i| if index < i { i - 1 } else { i });
                self.entered_from = match self.entered_from {
                    Some(i) if i == index => None,
                    Some(i) if index < i => Some(i - 1),
                    other => other,
                };
            }
        }
    }

    fn notify_changed(
        &mut self,
        index: usize,
        previous: Option<usize>,
        direction: Direction,
    ) -> HookAction {
        let Some(dialog) = self.dialogs.get(index) else {
            return HookAction::Stay;
        };
        let change = DialogChange {
            index,
            previous,
            direction,
            dialog,
            session: self.session.as_ref(),
            data: &self.data,
        };

        let mut action = HookAction::Stay;
        for hook in self.changed_hooks.iter_mut() {
            let requested = hook(&change);
            if action == HookAction::Stay {
                action = requested;
            }
        }
        action
    }

    fn follow(&mut self, action: HookAction) {
        if action == HookAction::Stay {
            return;
        }
        self.redirects += 1;
        if self.redirects > self.dialogs.len() * 2 + 2 {
            log::warn!("Dialog change hooks keep redirecting, ignoring {:?}", action);
            return;
        }
        match action {
            HookAction::Stay => {}
            HookAction::Next => self.step_next(),
            HookAction::Prev => self.step_prev(),
            HookAction::GoTo(index) => self.step_goto(index),
            HookAction::Cancel => self.cancel(),
        }
    }

    fn notify_execute(&self, notice: ExecuteNotice) {
        if let Some(hook) = self.current_dialog().and_then(|d| d.on_execute.clone()) {
            hook(notice);
        }
    }

    fn terminate(&mut self, outcome: UiOutcome) {
        log::info!("Dialog sequence {}", outcome);
        self.state = ShellState::Terminated(outcome);
        self.sync_data();
    }

    fn sync_data(&mut self) {
        if let Err(e) = self
            .session
            .set_property(RUNTIME_DATA_PROPERTY, &self.data.serialize())
        {
            log::debug!("Runtime data not synced to session: {}", e);
        }
    }

    fn reload_data(&mut self) {
        let stored = self.session.property(RUNTIME_DATA_PROPERTY);
        self.data.merge_serialized(&stored);
    }
}

impl fmt::Debug for UiShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiShell")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("dialogs", &self.dialogs.kinds())
            .field("execute_started", &self.execute_started)
            .field("errors", &self.errors)
            .finish()
    }
}
