//! Environment layering

use crate::types::ServiceEnv;

/// Layer service-level variables over inherited (group) variables.
///
/// An empty service value removes the inherited key rather than setting it to
/// the empty string.
pub fn merge_env(inherited: &ServiceEnv, service: &ServiceEnv) -> ServiceEnv {
    let mut merged = inherited.clone();
    for (key, value) in service {
        if value.is_empty() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
