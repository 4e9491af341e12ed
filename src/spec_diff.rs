//! Drift detection between a recorded machine specification and the desired
//! one.

use std::collections::{BTreeMap, BTreeSet};

/// Machine specification as an ordered map of field name to rendered value.
pub type MachineSpec = BTreeMap<String, String>;

const UNSET: &str = "<unset>";

/// One drifted configuration field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpecDiffItem {
    /// Field name.
    pub name: String,
    /// Recorded value, `None` when the field was not recorded.
    pub old: Option<String>,
    /// Desired value, `None` when the field is no longer wanted.
    pub new: Option<String>,
}

impl SpecDiffItem {
    /// Creates an entry for a field present on both sides.
    #[must_use]
    pub fn changed(
        name: impl Into<String>,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            old: Some(old.into()),
            new: Some(new.into()),
        }
    }
}

/// Compares `previous` against `desired`, returning one entry per field whose
/// value differs. Entries follow field-name order.
#[must_use]
pub fn diff_specs(previous: &MachineSpec, desired: &MachineSpec) -> Vec<SpecDiffItem> {
    let names: BTreeSet<&String> = previous.keys().chain(desired.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let old = previous.get(name);
            let new = desired.get(name);
            (old != new).then(|| SpecDiffItem {
                name: name.clone(),
                old: old.cloned(),
                new: new.cloned(),
            })
        })
        .collect()
}

/// Renders a diff as one `* name: old -> new` line per entry.
#[must_use]
pub fn describe_diff(diff: &[SpecDiffItem]) -> String {
    diff.iter()
        .map(|item| {
            format!(
                "* {}: {} -> {}",
                item.name,
                item.old.as_deref().unwrap_or(UNSET),
                item.new.as_deref().unwrap_or(UNSET)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
