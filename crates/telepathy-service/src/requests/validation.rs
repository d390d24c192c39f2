//! Structural validation of requested channel properties.

use serde_json::Value;

use super::{
    CHANNEL_TYPE, INITIATOR_HANDLE, INITIATOR_ID, PropertyMap, REQUESTED, RequestMethod,
    TARGET_HANDLE, TARGET_HANDLE_TYPE, TARGET_ID,
};
use crate::errors::TpError;
use crate::handles::{EntityType, Handle};

/// How the client named the target of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedTarget {
    /// No target (`TargetHandleType` is NONE).
    None,
    /// `TargetHandle` was given.
    Handle(Handle),
    /// `TargetID` was given.
    Id(String),
}

/// A request whose properties are well-formed but not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Originating client method.
    pub method: RequestMethod,
    /// Requested channel type.
    pub channel_type: String,
    /// Target entity type.
    pub entity_type: EntityType,
    /// Target as named by the client.
    pub target: RequestedTarget,
    /// The properties exactly as supplied.
    pub properties: PropertyMap,
}

/// Checks the shape of a request before anything is resolved or allocated.
///
/// # Errors
///
/// Returns `InvalidArgument` when a well-known property has the wrong type,
/// when the connection-owned initiator or `Requested` properties are supplied,
/// or when the target is missing, doubled or present for an untargeted
/// request.
pub fn validate(method: RequestMethod, properties: PropertyMap) -> Result<ValidatedRequest, TpError> {
    let channel_type = match properties.get(CHANNEL_TYPE) {
        None => return Err(TpError::invalid_argument("ChannelType is required")),
        Some(Value::String(channel_type)) => channel_type.clone(),
        Some(_) => return Err(TpError::invalid_argument("ChannelType must be a string")),
    };

    let entity_type = match properties.get(TARGET_HANDLE_TYPE) {
        None => EntityType::None,
        Some(raw) => {
            let wire = as_u32(raw).ok_or_else(|| {
                TpError::invalid_argument(
                    "TargetHandleType must be an integer in range 0 to 2**32-1",
                )
            })?;
            EntityType::from_wire(wire).ok_or_else(|| {
                TpError::invalid_argument(format!("TargetHandleType {wire} is not a known type"))
            })?
        }
    };

    let handle = match properties.get(TARGET_HANDLE) {
        None => None,
        Some(raw) => {
            let wire = as_u32(raw).ok_or_else(|| {
                TpError::invalid_argument("TargetHandle must be an integer in range 0 to 2**32-1")
            })?;
            Some(
                Handle::new(wire)
                    .ok_or_else(|| TpError::invalid_argument("TargetHandle must be non-zero"))?,
            )
        }
    };

    let id = match properties.get(TARGET_ID) {
        None => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(TpError::invalid_argument("TargetID must be a string")),
    };

    for (key, name) in [
        (INITIATOR_HANDLE, "InitiatorHandle"),
        (INITIATOR_ID, "InitiatorID"),
        (REQUESTED, "Requested"),
    ] {
        if properties.contains_key(key) {
            return Err(TpError::invalid_argument(format!(
                "{name} is set by the connection and may not be requested"
            )));
        }
    }

    let target = match (entity_type, handle, id) {
        (EntityType::None, None, None) => RequestedTarget::None,
        (EntityType::None, _, _) => {
            return Err(TpError::invalid_argument(
                "When TargetHandleType is NONE, neither TargetHandle nor TargetID can be specified",
            ));
        }
        (_, Some(handle), None) => RequestedTarget::Handle(handle),
        (_, None, Some(id)) => RequestedTarget::Id(id),
        (_, _, _) => {
            return Err(TpError::invalid_argument(
                "Exactly one of TargetHandle and TargetID must be supplied",
            ));
        }
    };

    Ok(ValidatedRequest {
        method,
        channel_type,
        entity_type,
        target,
        properties,
    })
}

/// Property map equivalent to a legacy `RequestChannel` call.
#[must_use]
pub fn legacy_properties(channel_type: &str, entity_type: u32, handle: u32) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert(CHANNEL_TYPE.to_owned(), Value::from(channel_type));
    properties.insert(TARGET_HANDLE_TYPE.to_owned(), Value::from(entity_type));
    if handle != 0 {
        properties.insert(TARGET_HANDLE.to_owned(), Value::from(handle));
    }
    properties
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|raw| u32::try_from(raw).ok())
}
