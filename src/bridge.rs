//! Immediate-to-deferred data bridge
//!
//! Deferred custom actions cannot read the live session. Everything they need
//! is captured while the session is still live and handed over as a single
//! opaque string, the deferred action's `CustomActionData`:
//!
//! ```json
//! {"version":1,"properties":{"INSTALLDIR":"C:\\App","WIX_MANAGED_RUNTIME_DATA":"AppName=My App"}}
//! ```
//!
//! The serialized data bag always travels as an ordinary property under
//! [`RUNTIME_DATA_PROPERTY`].

use crate::condition::PropertySource;
use crate::data::{CodecError, DataBag, RUNTIME_DATA_PROPERTY};
use crate::session::{Session, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("CustomActionData is empty")]
    Empty,

    #[error("Invalid CustomActionData: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported CustomActionData version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Invalid runtime data in CustomActionData: {0}")]
    Codec(#[from] CodecError),
}

/// Wire form of the deferred payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomActionData {
    pub version: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// What a deferred action gets back from its payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredContext {
    pub properties: BTreeMap<String, String>,
    pub data: DataBag,
}

/// Split a `;`/`,` separated property list, dropping blanks and duplicates
pub fn parse_property_list(list: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in list.split([';', ',']).map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Capture the requested session properties plus the data bag
pub fn capture_for_deferred<S: AsRef<str>>(
    session: &dyn Session,
    uses_properties: &[S],
    data: &DataBag,
) -> String {
    let mut properties = BTreeMap::new();
    for key in uses_properties.iter().map(|k| k.as_ref().trim()) {
        if key.is_empty() || key == RUNTIME_DATA_PROPERTY {
            continue;
        }
        properties.insert(key.to_string(), session.property(key));
    }
    properties.insert(RUNTIME_DATA_PROPERTY.to_string(), data.serialize());

    let envelope = CustomActionData {
        version: ENVELOPE_VERSION,
        properties,
    };
    match serde_json::to_string(&envelope) {
        Ok(blob) => blob,
        Err(e) => {
            log::error!("Cannot encode CustomActionData: {}", e);
            String::new()
        }
    }
}

fn parse_envelope(blob: &str) -> Result<CustomActionData, BridgeError> {
    if blob.trim().is_empty() {
        return Err(BridgeError::Empty);
    }
    let envelope: CustomActionData = serde_json::from_str(blob)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(BridgeError::UnsupportedVersion {
            found: envelope.version,
            expected: ENVELOPE_VERSION,
        });
    }
    Ok(envelope)
}

/// Decode a payload, rejecting any malformed part
pub fn try_rehydrate(blob: &str) -> Result<DeferredContext, BridgeError> {
    let envelope = parse_envelope(blob)?;
    let data = match envelope.properties.get(RUNTIME_DATA_PROPERTY) {
        Some(serialized) => DataBag::try_deserialize(serialized)?,
        None => DataBag::new(),
    };
    Ok(DeferredContext {
        properties: envelope.properties,
        data,
    })
}

/// Decode a payload. Any malformed part, including the bag inside an
/// otherwise valid payload, yields an empty context.
pub fn rehydrate_from_deferred(blob: &str) -> DeferredContext {
    match try_rehydrate(blob) {
        Ok(ctx) => ctx,
        Err(BridgeError::Empty) => {
            log::warn!("No CustomActionData: deferred action runs without captured state");
            DeferredContext::default()
        }
        Err(e) => {
            log::warn!("{}: deferred action runs without captured state", e);
            DeferredContext::default()
        }
    }
}

/// Copy captured properties into the process environment.
///
/// Keys that cannot name an environment variable are skipped.
pub fn stage_environment(properties: &BTreeMap<String, String>) -> usize {
    let mut staged = 0;
    for (key, value) in properties {
        if key.is_empty() || key.contains(['=', '\0']) || value.contains('\0') {
            log::debug!("Not staging '{}' into the environment", key);
            continue;
        }
        std::env::set_var(key, value);
        staged += 1;
    }
    log::debug!("Staged {} propert(ies) into the environment", staged);
    staged
}

/// Read-only session rebuilt from a deferred payload
#[derive(Debug, Clone, Default)]
pub struct DeferredSession {
    properties: BTreeMap<String, String>,
    log: Vec<String>,
}

impl DeferredSession {
    pub fn new(context: DeferredContext) -> Self {
        Self {
            properties: context.properties,
            log: Vec::new(),
        }
    }

    pub fn from_blob(blob: &str) -> Self {
        Self::new(rehydrate_from_deferred(blob))
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Bag carried in the payload
    pub fn data(&self) -> DataBag {
        DataBag::deserialize(&self.property(RUNTIME_DATA_PROPERTY))
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }
}

impl Session for DeferredSession {
    fn property(&self, name: &str) -> String {
        self.properties.get(name).cloned().unwrap_or_default()
    }

    fn set_property(&mut self, name: &str, _value: &str) -> Result<(), SessionError> {
        log::debug!("Ignoring write to '{}' in deferred context", name);
        Err(SessionError::Inactive)
    }

    fn log(&mut self, message: &str) {
        log::info!("{}", message);
        self.log.push(message.to_string());
    }

    fn is_active(&self) -> bool {
        false
    }
}

impl PropertySource for DeferredSession {
    fn lookup(&self, name: &str) -> Option<String> {
        self.properties.lookup(name)
    }
}
