//! The universal payload unit exchanged between agents.

// Layer 1: Standard library imports
use std::fmt::{self, Display};

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// Layer 3: Internal module imports
// (none)

/// Prefix of canonical object types derived from core types.
pub const CORE_OBJECT_TYPE_PREFIX: &str = "coaty.";

/// Closed set of object core types.
///
/// The core type determines the minimal required field set of an object
/// and is used for core-type based event observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoreType {
    /// Generic object without additional required fields.
    CoatyObject,
    /// A user known to the system.
    User,
    /// Self-description of an agent's communication manager.
    Identity,
    /// A unit of work assignable to users or agents.
    Task,
    /// A geographic location.
    Location,
    /// A log entry.
    Log,
    /// A snapshot of an object's state in time.
    Snapshot,
    /// A producer of IO values of a declared value type.
    IoSource,
    /// A consumer of IO values of a declared value type.
    IoActor,
    /// A shared, mutable domain descriptor evaluated by IO routers.
    IoContext,
    /// A grouping of IO sources and actors belonging to one agent.
    IoNode,
    /// An annotation attached to another object.
    Annotation,
}

impl CoreType {
    /// All core type values.
    pub const ALL: [CoreType; 12] = [
        Self::CoatyObject,
        Self::User,
        Self::Identity,
        Self::Task,
        Self::Location,
        Self::Log,
        Self::Snapshot,
        Self::IoSource,
        Self::IoActor,
        Self::IoContext,
        Self::IoNode,
        Self::Annotation,
    ];

    /// The core type's name as used in event filters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CoatyObject => "CoatyObject",
            Self::User => "User",
            Self::Identity => "Identity",
            Self::Task => "Task",
            Self::Location => "Location",
            Self::Log => "Log",
            Self::Snapshot => "Snapshot",
            Self::IoSource => "IoSource",
            Self::IoActor => "IoActor",
            Self::IoContext => "IoContext",
            Self::IoNode => "IoNode",
            Self::Annotation => "Annotation",
        }
    }

    /// Look up a core type by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().find(|t| t.name() == name).copied()
    }

    /// The canonical object type derived from this core type,
    /// e.g. `coaty.CoatyObject`.
    pub fn canonical_object_type(&self) -> String {
        format!("{CORE_OBJECT_TYPE_PREFIX}{}", self.name())
    }
}

impl Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The universal payload unit of all communication events.
///
/// Subtype-specific properties live in the flattened `extra` map so that
/// any object round-trips losslessly through the wire format and the
/// object filter/matcher operates uniformly.
///
/// # Example
/// ```rust
/// use coaty::model::{CoatyObject, CoreType};
///
/// let obj = CoatyObject::new(CoreType::Task, "com.mydomain.RepairTask", "Repair pump");
/// assert_eq!(obj.core_type, CoreType::Task);
/// assert_eq!(obj.object_type, "com.mydomain.RepairTask");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoatyObject {
    /// Globally unique identifier of this logical object.
    pub object_id: Uuid,

    /// Core type of the object.
    pub core_type: CoreType,

    /// Canonical dotted type string identifying the concrete subtype.
    ///
    /// Opaque to the core except that it must satisfy the topic grammar's
    /// filter charset.
    pub object_type: String,

    /// Human-readable label.
    pub name: String,

    /// Optional reference to a parent object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_object_id: Option<Uuid>,

    /// Optional reference to an assigned user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_user_id: Option<Uuid>,

    /// Optional reference to a location object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Uuid>,

    /// Optional identifier defined by an external system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Subtype-specific properties.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CoatyObject {
    /// Create a new object with a fresh object id.
    pub fn new(
        core_type: CoreType,
        object_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_id: Uuid::new_v4(),
            core_type,
            object_type: object_type.into(),
            name: name.into(),
            parent_object_id: None,
            assignee_user_id: None,
            location_id: None,
            external_id: None,
            extra: Map::new(),
        }
    }

    /// Create a new object whose object type is the canonical one derived
    /// from the core type.
    pub fn with_core_type(core_type: CoreType, name: impl Into<String>) -> Self {
        Self::new(core_type, core_type.canonical_object_type(), name)
    }

    /// Builder method: set an extra (subtype-specific) property.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Builder method: set the external id.
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Whether the object type is the canonical type of its core type.
    pub fn has_canonical_object_type(&self) -> bool {
        self.object_type == self.core_type.canonical_object_type()
    }

    /// Look up an extra property.
    pub fn extra_property(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Self-description of an agent advertised once on join.
///
/// The identity's object id is used as the source id of every event the
/// agent publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub CoatyObject);

impl Identity {
    /// Create a new identity with a fresh object id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(CoatyObject::with_core_type(CoreType::Identity, name))
    }

    /// The identity's object id.
    pub fn id(&self) -> Uuid {
        self.0.object_id
    }

    /// The wrapped identity object.
    pub fn object(&self) -> &CoatyObject {
        &self.0
    }
}
