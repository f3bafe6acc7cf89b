//! # Domain Types
//!
//! The simulated machine and its hardware inventory.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Machine                                                        │   │
//! │  │  ─────────────────────────────────────────────────────────────  │   │
//! │  │  serial   (from the bios component, never changes)              │   │
//! │  │  modules  ModuleType → [Component, ...]                         │   │
//! │  │  files    FileStore (invconf, device log)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────────────────────────────┐     │
//! │  │   ModuleType    │   │   Component                             │     │
//! │  │  ─────────────  │   │  ─────────────────────────────────────  │     │
//! │  │  "bios", "cpu"  │   │  cid   (3 chars, unique per module)     │     │
//! │  │  [a-z][a-z0-9_]*│   │  open attribute map (may be nested)     │     │
//! │  └─────────────────┘   └─────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity Invariant
//! Every machine has exactly one `bios` component and its `serial` attribute
//! is the machine serial. [`Machine::new`] refuses anything else and there is
//! no way to mutate modules afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::files::FileStore;
use crate::ident::{generate_unique, UPPER_ALPHANUMERIC};
use crate::validation::{validate_module_type, validate_serial};
use crate::{CID_ATTRIBUTE, CID_LENGTH, IDENTITY_MODULE, SERIAL_ATTRIBUTE};

// =============================================================================
// Module Type
// =============================================================================

/// A validated module type name such as `bios` or `cpu`.
///
/// Only values that pass [`validate_module_type`] can be constructed, which
/// makes them safe to use as table names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleType(String);

impl ModuleType {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_module_type(&name)?;
        Ok(Self(name))
    }

    /// The identity module type.
    pub fn identity() -> Self {
        Self(IDENTITY_MODULE.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_identity(&self) -> bool {
        self.0 == IDENTITY_MODULE
    }
}

impl TryFrom<String> for ModuleType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ModuleType {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModuleType> for String {
    fn from(value: ModuleType) -> Self {
        value.0
    }
}

impl AsRef<str> for ModuleType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Component
// =============================================================================

/// One hardware component: an open attribute map carrying its `cid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Component {
    attrs: Map<String, Value>,
}

impl Component {
    pub fn new(attrs: Map<String, Value>) -> Self {
        Self { attrs }
    }

    /// Local component identifier, if assigned.
    pub fn cid(&self) -> Option<&str> {
        self.attrs.get(CID_ATTRIBUTE).and_then(Value::as_str)
    }

    pub fn set_cid(&mut self, cid: impl Into<String>) {
        self.attrs
            .insert(CID_ATTRIBUTE.to_string(), Value::String(cid.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attrs.insert(key.into(), value);
    }

    /// Full attribute map including `cid`.
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn into_attributes(self) -> Map<String, Value> {
        self.attrs
    }
}

impl From<Map<String, Value>> for Component {
    fn from(attrs: Map<String, Value>) -> Self {
        Self::new(attrs)
    }
}

/// Module type → ordered component list.
pub type Modules = BTreeMap<ModuleType, Vec<Component>>;

/// Gives every component a `cid` unique within its module list.
///
/// Existing unique cids are kept; missing or duplicate ones are replaced.
pub fn assign_cids(modules: &mut Modules) -> CoreResult<()> {
    for components in modules.values_mut() {
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending = Vec::new();

        for (idx, component) in components.iter().enumerate() {
            match component.cid() {
                Some(cid) if !cid.is_empty() && seen.insert(cid.to_string()) => {}
                _ => pending.push(idx),
            }
        }

        for idx in pending {
            let cid = generate_unique(CID_LENGTH, UPPER_ALPHANUMERIC, |c| seen.contains(c))?;
            seen.insert(cid.clone());
            components[idx].set_cid(cid);
        }
    }
    Ok(())
}

// =============================================================================
// Machine
// =============================================================================

/// A simulated computer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MachineFile", into = "MachineFile")]
pub struct Machine {
    serial: String,
    modules: Modules,
    files: FileStore,
}

impl Machine {
    /// Builds a machine, assigning cids and deriving the serial from the
    /// single `bios` component.
    pub fn new(mut modules: Modules, files: FileStore) -> CoreResult<Self> {
        let serial = identity_serial(&modules)?;
        assign_cids(&mut modules)?;

        Ok(Self {
            serial,
            modules,
            files,
        })
    }

    #[inline]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn modules(&self) -> &Modules {
        &self.modules
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileStore {
        &mut self.files
    }
}

fn identity_serial(modules: &Modules) -> CoreResult<String> {
    let bios = modules
        .get(&ModuleType::identity())
        .ok_or(CoreError::MissingIdentity)?;

    match bios.len() {
        0 => return Err(CoreError::MissingIdentity),
        1 => {}
        count => return Err(CoreError::DuplicateIdentity { count }),
    }

    let serial = bios[0]
        .get(SERIAL_ATTRIBUTE)
        .and_then(Value::as_str)
        .ok_or(CoreError::MissingSerial)?;
    validate_serial(serial)?;

    Ok(serial.to_string())
}

// =============================================================================
// Machine File Format
// =============================================================================

/// On-disk `.computer` layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineFile {
    pub modules: Modules,
    #[serde(default)]
    pub filesystem: FileStore,
}

impl TryFrom<MachineFile> for Machine {
    type Error = CoreError;

    fn try_from(file: MachineFile) -> Result<Self, Self::Error> {
        Machine::new(file.modules, file.filesystem)
    }
}

impl From<Machine> for MachineFile {
    fn from(machine: Machine) -> Self {
        Self {
            modules: machine.modules,
            filesystem: machine.files,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
