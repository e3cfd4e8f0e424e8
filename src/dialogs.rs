//! Dialog model
//!
//! Dialogs are plain descriptors: a kind, navigation capabilities, an optional
//! skip predicate and an optional render callback. The shell owns a
//! [`ManagedDialogs`] sequence and drives navigation over it.

use crate::condition::{Condition, PropertySource};
use crate::data::DataBag;
use crate::session::{Session, SessionError, SetupMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Kind of a dialog in a sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DialogKind {
    Welcome,
    Licence,
    SetupType,
    Features,
    InstallDir,
    Progress,
    Exit,
    MaintenanceType,
    /// User-defined dialog
    Custom(String),
}

impl DialogKind {
    /// Built-in kinds, in their usual install order
    pub fn standard() -> &'static [DialogKind] {
        &[
            DialogKind::Welcome,
            DialogKind::Licence,
            DialogKind::SetupType,
            DialogKind::Features,
            DialogKind::InstallDir,
            DialogKind::Progress,
            DialogKind::Exit,
            DialogKind::MaintenanceType,
        ]
    }

    pub fn name(&self) -> &str {
        match self {
            DialogKind::Welcome => "welcome",
            DialogKind::Licence => "licence",
            DialogKind::SetupType => "setup-type",
            DialogKind::Features => "features",
            DialogKind::InstallDir => "install-dir",
            DialogKind::Progress => "progress",
            DialogKind::Exit => "exit",
            DialogKind::MaintenanceType => "maintenance-type",
            DialogKind::Custom(name) => name,
        }
    }

    pub fn default_title(&self) -> String {
        match self {
            DialogKind::Welcome => "Welcome".to_string(),
            DialogKind::Licence => "End-User License Agreement".to_string(),
            DialogKind::SetupType => "Choose Setup Type".to_string(),
            DialogKind::Features => "Custom Setup".to_string(),
            DialogKind::InstallDir => "Destination Folder".to_string(),
            DialogKind::Progress => "Installing".to_string(),
            DialogKind::Exit => "Completed".to_string(),
            DialogKind::MaintenanceType => "Change, repair, or remove installation".to_string(),
            DialogKind::Custom(name) => name.clone(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, DialogKind::Custom(_))
    }
}

impl From<&str> for DialogKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().replace('_', "-").as_str() {
            "welcome" => DialogKind::Welcome,
            "licence" | "license" => DialogKind::Licence,
            "setup-type" | "setuptype" => DialogKind::SetupType,
            "features" | "feature-tree" => DialogKind::Features,
            "install-dir" | "installdir" => DialogKind::InstallDir,
            "progress" => DialogKind::Progress,
            "exit" => DialogKind::Exit,
            "maintenance-type" | "maintenancetype" => DialogKind::MaintenanceType,
            _ => DialogKind::Custom(s.strip_prefix("custom:").unwrap_or(s).to_string()),
        }
    }
}

impl From<String> for DialogKind {
    fn from(s: String) -> Self {
        DialogKind::from(s.as_str())
    }
}

impl From<DialogKind> for String {
    fn from(kind: DialogKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for DialogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which sequence a dialog is displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogRole {
    #[default]
    Install,
    Modify,
}

/// Execution notification forwarded to the current dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteNotice {
    Started,
    Progress(u8),
    Complete,
}

pub type RenderFn = Rc<dyn Fn(&mut DialogContext<'_>) -> anyhow::Result<()>>;
pub type ExecuteHook = Rc<dyn Fn(ExecuteNotice)>;
pub type SkipFn = Rc<dyn Fn(&dyn Session, &DataBag) -> bool>;

/// Predicate deciding whether a dialog is bypassed during navigation
#[derive(Clone)]
pub enum SkipPredicate {
    /// Property condition, checked against the session then the bag
    When(Condition),
    Custom(SkipFn),
}

impl SkipPredicate {
    pub fn should_skip(&self, session: &dyn Session, data: &DataBag) -> bool {
        match self {
            SkipPredicate::When(condition) => condition.evaluate(&Layered { session, data }),
            SkipPredicate::Custom(f) => f(session, data),
        }
    }
}

impl fmt::Debug for SkipPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipPredicate::When(c) => write!(f, "When({:?})", c.source()),
            SkipPredicate::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

struct Layered<'a> {
    session: &'a dyn Session,
    data: &'a DataBag,
}

impl PropertySource for Layered<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.session.lookup(name).or_else(|| self.data.lookup(name))
    }
}

/// A dialog in a sequence
#[derive(Clone)]
pub struct DialogDescriptor {
    pub kind: DialogKind,
    pub title: String,
    pub role: DialogRole,
    pub can_go_back: bool,
    pub can_cancel: bool,
    pub skip: Option<SkipPredicate>,
    pub render: Option<RenderFn>,
    pub on_execute: Option<ExecuteHook>,
}

impl DialogDescriptor {
    pub fn new(kind: DialogKind) -> Self {
        Self {
            title: kind.default_title(),
            kind,
            role: DialogRole::default(),
            can_go_back: true,
            can_cancel: true,
            skip: None,
            render: None,
            on_execute: None,
        }
    }

    pub fn custom(name: &str) -> Self {
        Self::new(DialogKind::Custom(name.to_string()))
    }

    /// Standard descriptor for a kind, with its usual navigation capabilities
    pub fn standard(kind: DialogKind) -> Self {
        match kind {
            DialogKind::Welcome | DialogKind::MaintenanceType => {
                Self::new(kind).without_back()
            }
            DialogKind::Exit => Self::new(kind).without_back().without_cancel(),
            other => Self::new(other),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_role(mut self, role: DialogRole) -> Self {
        self.role = role;
        self
    }

    pub fn without_back(mut self) -> Self {
        self.can_go_back = false;
        self
    }

    pub fn without_cancel(mut self) -> Self {
        self.can_cancel = false;
        self
    }

    pub fn skip_if(mut self, condition: Condition) -> Self {
        self.skip = Some(SkipPredicate::When(condition));
        self
    }

    pub fn skip_when<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Session, &DataBag) -> bool + 'static,
    {
        self.skip = Some(SkipPredicate::Custom(Rc::new(f)));
        self
    }

    pub fn on_render<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut DialogContext<'_>) -> anyhow::Result<()> + 'static,
    {
        self.render = Some(Rc::new(f));
        self
    }

    pub fn on_execute<F>(mut self, f: F) -> Self
    where
        F: Fn(ExecuteNotice) + 'static,
    {
        self.on_execute = Some(Rc::new(f));
        self
    }

    pub fn should_skip(&self, session: &dyn Session, data: &DataBag) -> bool {
        self.skip
            .as_ref()
            .is_some_and(|p| p.should_skip(session, data))
    }
}

impl fmt::Debug for DialogDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogDescriptor")
            .field("kind", &self.kind)
            .field("title", &self.title)
            .field("role", &self.role)
            .field("can_go_back", &self.can_go_back)
            .field("can_cancel", &self.can_cancel)
            .field("skip", &self.skip)
            .field("render", &self.render.is_some())
            .finish()
    }
}

/// A dialog type that can be appended to a sequence by type
pub trait ManagedDialog {
    fn descriptor() -> DialogDescriptor;
}

macro_rules! standard_dialog {
    ($name:ident, $kind:expr) => {
        pub struct $name;

        impl ManagedDialog for $name {
            fn descriptor() -> DialogDescriptor {
                DialogDescriptor::standard($kind)
            }
        }
    };
}

standard_dialog!(WelcomeDialog, DialogKind::Welcome);
standard_dialog!(LicenceDialog, DialogKind::Licence);
standard_dialog!(SetupTypeDialog, DialogKind::SetupType);
standard_dialog!(FeaturesDialog, DialogKind::Features);
standard_dialog!(InstallDirDialog, DialogKind::InstallDir);
standard_dialog!(ProgressDialog, DialogKind::Progress);
standard_dialog!(ExitDialog, DialogKind::Exit);
standard_dialog!(MaintenanceTypeDialog, DialogKind::MaintenanceType);

/// Ordered, mutable dialog sequence
#[derive(Debug, Clone, Default)]
pub struct ManagedDialogs {
    role: DialogRole,
    items: Vec<DialogDescriptor>,
}

impl ManagedDialogs {
    pub fn new(role: DialogRole) -> Self {
        Self {
            role,
            items: Vec::new(),
        }
    }

    /// Sequence of standard dialogs for the given kinds
    pub fn from_kinds(role: DialogRole, kinds: &[DialogKind]) -> Self {
        let mut dialogs = Self::new(role);
        for kind in kinds {
            dialogs.push(DialogDescriptor::standard(kind.clone()));
        }
        dialogs
    }

    pub fn role(&self) -> DialogRole {
        self.role
    }

    /// Append a dialog type
    pub fn add<T: ManagedDialog>(mut self) -> Self {
        self.push(T::descriptor());
        self
    }

    /// Append a descriptor
    pub fn add_descriptor(mut self, descriptor: DialogDescriptor) -> Self {
        self.push(descriptor);
        self
    }

    pub fn push(&mut self, descriptor: DialogDescriptor) {
        self.items.push(descriptor.with_role(self.role));
    }

    /// Insert at `index`, clamped to the end of the sequence
    pub fn insert(&mut self, index: usize, descriptor: DialogDescriptor) -> usize {
        let at = index.min(self.items.len());
        self.items.insert(at, descriptor.with_role(self.role));
        at
    }

    pub fn remove(&mut self, index: usize) -> Option<DialogDescriptor> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&DialogDescriptor> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DialogDescriptor> {
        self.items.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DialogDescriptor> {
        self.items.iter()
    }

    pub fn position_of(&self, kind: &DialogKind) -> Option<usize> {
        self.items.iter().position(|d| &d.kind == kind)
    }

    pub fn kinds(&self) -> Vec<DialogKind> {
        self.items.iter().map(|d| d.kind.clone()).collect()
    }
}

/// Install and maintenance dialog sequences of a project
#[derive(Debug, Clone, Default)]
pub struct ManagedUI {
    pub install_dialogs: ManagedDialogs,
    pub modify_dialogs: ManagedDialogs,
}

impl ManagedUI {
    /// No dialogs: the engine falls back to its built-in UI
    pub fn empty() -> Self {
        Self {
            install_dialogs: ManagedDialogs::new(DialogRole::Install),
            modify_dialogs: ManagedDialogs::new(DialogRole::Modify),
        }
    }

    /// The stock feature-tree UI
    pub fn default_ui() -> Self {
        Self {
            install_dialogs: ManagedDialogs::new(DialogRole::Install)
                .add::<WelcomeDialog>()
                .add::<LicenceDialog>()
                .add::<SetupTypeDialog>()
                .add::<FeaturesDialog>()
                .add::<InstallDirDialog>()
                .add::<ProgressDialog>()
                .add::<ExitDialog>(),
            modify_dialogs: ManagedDialogs::new(DialogRole::Modify)
                .add::<MaintenanceTypeDialog>()
                .add::<FeaturesDialog>()
                .add::<ProgressDialog>()
                .add::<ExitDialog>(),
        }
    }

    /// Sequence shown for a setup mode; uninstall shows no managed UI
    pub fn sequence_for(&self, mode: SetupMode) -> Option<&ManagedDialogs> {
        match mode {
            SetupMode::Installing => Some(&self.install_dialogs),
            SetupMode::Modifying | SetupMode::Repairing => Some(&self.modify_dialogs),
            SetupMode::Uninstalling | SetupMode::Unknown => None,
        }
    }
}

/// Sequence change requested while a dialog renders
#[derive(Debug, Clone)]
pub enum SequenceEdit {
    Insert(usize, DialogDescriptor),
    Remove(usize),
}

/// What a render callback sees of the runtime.
///
/// Sequence edits are buffered and applied once the callback returns, so
/// they take effect for the next navigation call.
pub struct DialogContext<'a> {
    index: usize,
    kind: DialogKind,
    session: &'a mut dyn Session,
    data: &'a mut DataBag,
    pub(crate) edits: Vec<SequenceEdit>,
    pub(crate) start_execute: bool,
}

impl<'a> DialogContext<'a> {
    pub fn new(
        index: usize,
        kind: DialogKind,
        session: &'a mut dyn Session,
        data: &'a mut DataBag,
    ) -> Self {
        Self {
            index,
            kind,
            session,
            data,
            edits: Vec::new(),
            start_execute: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &DialogKind {
        &self.kind
    }

    pub fn property(&self, name: &str) -> String {
        self.session.property(name)
    }

    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        self.session.set_property(name, value)
    }

    pub fn data(&self) -> &DataBag {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut DataBag {
        &mut *self.data
    }

    pub fn log(&mut self, message: &str) {
        self.session.log(message);
    }

    pub fn insert_dialog(&mut self, index: usize, descriptor: DialogDescriptor) {
        self.edits.push(SequenceEdit::Insert(index, descriptor));
    }

    pub fn insert_after_current(&mut self, descriptor: DialogDescriptor) {
        self.insert_dialog(self.index + 1, descriptor);
    }

    pub fn remove_dialog(&mut self, index: usize) {
        self.edits.push(SequenceEdit::Remove(index));
    }

    /// Ask the shell to begin the execute phase after rendering
    pub fn start_execute(&mut self) {
        self.start_execute = true;
    }
}
