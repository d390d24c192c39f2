//! Bus names and object paths for connection objects.

use crate::transport::{BusName, ObjectPath};

const BUS_NAME_BASE: &str = "org.freedesktop.Telepathy.Connection.";
const OBJECT_PATH_BASE: &str = "/org/freedesktop/Telepathy/Connection/";

/// Escapes arbitrary text into a valid bus-name element or path segment.
///
/// ASCII letters and digits are kept, except a leading digit; every other
/// byte becomes `_` followed by two lowercase hex digits. The empty string
/// becomes `_`.
#[must_use]
pub fn escape_as_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".to_owned();
    }
    let mut escaped = String::with_capacity(name.len());
    for (index, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphabetic() || (index > 0 && byte.is_ascii_digit());
        if keep {
            escaped.push(char::from(byte));
        } else {
            escaped.push_str(&format!("_{byte:02x}"));
        }
    }
    escaped
}

/// Where a connection lives on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionNames {
    bus_name: BusName,
    object_path: ObjectPath,
}

impl ConnectionNames {
    /// Names for a connection of `manager` speaking `protocol`.
    ///
    /// `manager` must already be a valid bus-name element; the protocol and
    /// unique name are escaped.
    #[must_use]
    pub fn new(manager: &str, protocol: &str, unique: &str) -> Self {
        let protocol_part = escape_as_identifier(protocol);
        let unique_part = escape_as_identifier(unique);
        Self {
            bus_name: BusName::new(format!(
                "{BUS_NAME_BASE}{manager}.{protocol_part}.{unique_part}"
            )),
            object_path: ObjectPath::new(format!(
                "{OBJECT_PATH_BASE}{manager}/{protocol_part}/{unique_part}"
            )),
        }
    }

    /// Well-known bus name.
    #[must_use]
    pub const fn bus_name(&self) -> &BusName {
        &self.bus_name
    }

    /// Object path of the connection.
    #[must_use]
    pub const fn object_path(&self) -> &ObjectPath {
        &self.object_path
    }
}
