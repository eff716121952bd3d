//! Class-to-bin assignment and the store that owns it.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::model::{BinIndex, WasteClass};

/// Built-in assignment used until the operator changes it.
pub const DEFAULT_ASSIGNMENTS: [(WasteClass, BinIndex); 6] = [
    (WasteClass::Plastic, BinIndex(0)),
    (WasteClass::Metal, BinIndex(0)),
    (WasteClass::Glass, BinIndex(1)),
    (WasteClass::Biological, BinIndex(1)),
    (WasteClass::Paper, BinIndex(2)),
    (WasteClass::Cardboard, BinIndex(2)),
];

#[derive(Debug, Clone, PartialEq, Eq)]
/// Which bin each waste class goes into. A class maps to at most one bin.
pub struct Mapping {
    assignments: BTreeMap<WasteClass, BinIndex>,
}

impl Default for Mapping {
    fn default() -> Self {
        Self {
            assignments: DEFAULT_ASSIGNMENTS.into_iter().collect(),
        }
    }
}

impl Mapping {
    /// A mapping with no assignments.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            assignments: BTreeMap::new(),
        }
    }

    /// Bin assigned to `class`.
    #[must_use]
    pub fn bin_for(&self, class: WasteClass) -> Option<BinIndex> {
        self.assignments.get(&class).copied()
    }

    /// Bin assigned to a raw detector label. Labels outside the enumerated set never match.
    #[must_use]
    pub fn bin_for_label(&self, label: &str) -> Option<BinIndex> {
        label
            .parse::<WasteClass>()
            .ok()
            .and_then(|class| self.bin_for(class))
    }

    /// Assign `class` to `bin`, replacing any earlier assignment for that class only.
    pub fn assign(&mut self, class: WasteClass, bin: BinIndex) {
        self.assignments.insert(class, bin);
    }

    /// Classes currently routed to `bin`, in enumeration order.
    #[must_use]
    pub fn classes_for(&self, bin: BinIndex) -> Vec<WasteClass> {
        self.assignments
            .iter()
            .filter(|(_class, assigned)| **assigned == bin)
            .map(|(class, _assigned)| *class)
            .collect()
    }

    /// Iterate assignments in class order.
    pub fn iter(&self) -> impl Iterator<Item = (WasteClass, BinIndex)> + '_ {
        self.assignments.iter().map(|(class, bin)| (*class, *bin))
    }
}

impl FromIterator<(WasteClass, BinIndex)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (WasteClass, BinIndex)>>(iter: I) -> Self {
        Self {
            assignments: iter.into_iter().collect(),
        }
    }
}

/// Process-wide holder of the live mapping. Readers get copies; writers merge one class at a time.
#[derive(Debug, Default)]
pub struct MappingStore {
    current: RwLock<Mapping>,
}

impl MappingStore {
    /// Start from `initial`.
    #[must_use]
    pub fn new(initial: Mapping) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Copy of the current mapping.
    #[must_use]
    pub fn get(&self) -> Mapping {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge a single assignment into the current mapping.
    pub fn set(&self, class: WasteClass, bin: BinIndex) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .assign(class, bin);
        tracing::info!(%class, %bin, "mapping updated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_covers_every_class() {
        let mapping = Mapping::default();
        for class in WasteClass::ALL {
            assert!(mapping.bin_for(class).is_some(), "{class} unmapped");
        }
        assert_eq!(
            mapping.classes_for(BinIndex(0)),
            vec![WasteClass::Plastic, WasteClass::Metal],
            "plastic and metal share the first bin"
        );
    }

    #[test]
    fn set_merges_without_disturbing_other_classes() {
        let store = MappingStore::new(Mapping::default());
        store.set(WasteClass::Plastic, BinIndex(2));

        let mapping = store.get();
        assert_eq!(mapping.bin_for(WasteClass::Plastic), Some(BinIndex(2)), "plastic moved");
        assert_eq!(mapping.bin_for(WasteClass::Metal), Some(BinIndex(0)), "metal kept");
        assert_eq!(mapping.bin_for(WasteClass::Glass), Some(BinIndex(1)), "glass kept");
    }

    #[test]
    fn unknown_labels_are_unmapped() {
        let mapping = Mapping::default();
        assert_eq!(
            mapping.bin_for_label("PAPER"),
            Some(BinIndex(2)),
            "labels match case-insensitively"
        );
        assert_eq!(mapping.bin_for_label("battery"), None, "undeclared label");
        assert_eq!(Mapping::empty().bin_for_label("paper"), None, "empty mapping");
    }
}
