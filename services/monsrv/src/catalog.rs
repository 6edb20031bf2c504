//! Register catalog with lock-free snapshots
//!
//! Readers take a [`Snapshot`] at the start of a pass; reconfiguration swaps
//! the whole set in one pointer store, so a pass sees either the old or the
//! new catalog, never a mix.

use arc_swap::ArcSwap;
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

use crate::config::{validate_registers, RegisterDefinition};
use crate::error::{MonSrvError, Result};

/// Immutable point-in-time view of the catalog
#[derive(Debug, Clone, Default)]
pub struct Snapshot(Arc<Vec<RegisterDefinition>>);

impl Snapshot {
    pub fn to_vec(&self) -> Vec<RegisterDefinition> {
        self.0.as_ref().clone()
    }
}

impl Deref for Snapshot {
    type Target = [RegisterDefinition];

    fn deref(&self) -> &Self::Target {
        self.0.as_slice()
    }
}

impl From<Vec<RegisterDefinition>> for Snapshot {
    fn from(definitions: Vec<RegisterDefinition>) -> Self {
        Self(Arc::new(definitions))
    }
}

/// Ordered, validated set of registers to poll
pub struct RegisterCatalog {
    definitions: ArcSwap<Vec<RegisterDefinition>>,
}

impl Default for RegisterCatalog {
    fn default() -> Self {
        Self {
            definitions: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl RegisterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-filled with `definitions` (validated)
    pub fn with_definitions(definitions: Vec<RegisterDefinition>) -> Result<Self> {
        let catalog = Self::new();
        catalog.replace(definitions)?;
        Ok(catalog)
    }

    /// Append one definition; the catalog is unchanged on error
    pub fn add(&self, definition: RegisterDefinition) -> Result<()> {
        let definition = definition.resolved();
        definition.validate()?;

        // Checked inside the rcu closure so a racing add cannot slip in a duplicate
        let mut duplicate = false;
        self.definitions.rcu(|current| {
            duplicate = current.iter().any(|d| d.name == definition.name);
            if duplicate {
                return Arc::clone(current);
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(definition.clone());
            Arc::new(next)
        });

        if duplicate {
            return Err(MonSrvError::ValidationError(format!(
                "Duplicate register name '{}'",
                definition.name
            )));
        }
        Ok(())
    }

    /// Swap the whole set atomically; all-or-nothing
    pub fn replace(&self, definitions: Vec<RegisterDefinition>) -> Result<()> {
        let definitions: Vec<_> = definitions
            .into_iter()
            .map(RegisterDefinition::resolved)
            .collect();
        validate_registers(&definitions)?;

        let count = definitions.len();
        self.definitions.store(Arc::new(definitions));
        info!("Register catalog replaced ({} definitions)", count);
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.definitions.load_full())
    }

    pub fn len(&self) -> usize {
        self.definitions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.load().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::RegisterType;

    #[test]
    fn test_add_and_snapshot_order() {
        let catalog = RegisterCatalog::new();
        catalog
            .add(RegisterDefinition::new(0, 5, RegisterType::Holding).named("H0"))
            .unwrap();
        catalog
            .add(RegisterDefinition::new(100, 2, RegisterType::Input).named("I100"))
            .unwrap();

        let snapshot = catalog.snapshot();
        let names: Vec<_> = snapshot.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["H0", "I100"]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_add_rejects_invalid_and_keeps_catalog() {
        let catalog = RegisterCatalog::new();
        catalog
            .add(RegisterDefinition::new(0, 1, RegisterType::Holding))
            .unwrap();

        let err = catalog
            .add(RegisterDefinition::new(0, 126, RegisterType::Input))
            .unwrap_err();
        assert!(err.is_validation());

        let err = catalog
            .add(RegisterDefinition::new(5, 1, RegisterType::Coil).named("holding_0"))
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let catalog = RegisterCatalog::with_definitions(vec![RegisterDefinition::new(
            0,
            1,
            RegisterType::Holding,
        )])
        .unwrap();

        let result = catalog.replace(vec![
            RegisterDefinition::new(10, 1, RegisterType::Holding),
            RegisterDefinition::new(65_535, 2, RegisterType::Holding),
        ]);
        assert!(result.is_err());
        assert_eq!(catalog.snapshot()[0].address, 0);

        catalog
            .replace(vec![
                RegisterDefinition::new(10, 1, RegisterType::Holding),
                RegisterDefinition::new(0, 1, RegisterType::Coil),
            ])
            .unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_snapshot_unaffected_by_replace() {
        let catalog = RegisterCatalog::with_definitions(vec![
            RegisterDefinition::new(0, 1, RegisterType::Holding),
            RegisterDefinition::new(1, 1, RegisterType::Holding),
        ])
        .unwrap();

        let before = catalog.snapshot();
        catalog.replace(Vec::new()).unwrap();

        assert_eq!(before.len(), 2);
        assert!(catalog.snapshot().is_empty());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_concurrent_replace_never_torn() {
        let catalog = Arc::new(RegisterCatalog::new());
        let set_a: Vec<_> = (0..10)
            .map(|i| RegisterDefinition::new(i, 1, RegisterType::Holding))
            .collect();
        let set_b: Vec<_> = (0..20)
            .map(|i| RegisterDefinition::new(i, 1, RegisterType::Coil))
            .collect();
        catalog.replace(set_a.clone()).unwrap();

        let writer = {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { set_b.clone() } else { set_a.clone() };
                    catalog.replace(next).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let snapshot = catalog.snapshot();
            let first = snapshot[0].register_type;
            assert!(snapshot.iter().all(|d| d.register_type == first));
            assert!(snapshot.len() == 10 || snapshot.len() == 20);
        }
        writer.join().unwrap();
    }
}
