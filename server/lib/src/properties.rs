//! Resource properties live outside the identity table. The store reads a few of them (names,
//! the primary email) and writes back the primary email and the creator of a new account.

use std::collections::BTreeMap;

use crate::prelude::*;

pub trait ResourceProperties: Send + Sync {
    fn get_property(&self, rsc_id: ResourceId, name: &str) -> Option<JsonValue>;

    fn update_properties(
        &self,
        rsc_id: ResourceId,
        props: BTreeMap<String, JsonValue>,
    ) -> Result<(), OperationError>;

    /// Drop any cached view of the resource after its identities changed.
    fn invalidate(&self, _rsc_id: ResourceId) {}
}

/// Read a property as trimmed, non-empty text. Translated values (an object of
/// language => text) yield the english text, or the first text present.
pub fn get_property_text(
    props: &dyn ResourceProperties,
    rsc_id: ResourceId,
    name: &str,
) -> Option<String> {
    let value = props.get_property(rsc_id, name)?;
    let text = match &value {
        JsonValue::String(s) => Some(s.as_str()),
        JsonValue::Object(tr) => tr
            .get("en")
            .and_then(JsonValue::as_str)
            .or_else(|| tr.values().find_map(JsonValue::as_str)),
        _ => None,
    }?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

pub fn set_property(
    props: &dyn ResourceProperties,
    rsc_id: ResourceId,
    name: &str,
    value: JsonValue,
) -> Result<(), OperationError> {
    let mut update = BTreeMap::new();
    update.insert(name.to_string(), value);
    props.update_properties(rsc_id, update).map_err(|err| {
        admin_error!(%rsc_id, %name, ?err, "Unable to update resource property");
        err
    })
}
