// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type adapters: conversions that let ports of different types connect.
//!
//! The registry is shared between graphs through an `Arc`. Adapter sources
//! added with [`TypeAdapterRegistry::with_adapter`] are loaded lazily, once,
//! on the first query. Conversions are looked up by exact `(from, to)` pair
//! and are never chained.

use crate::port::{PortType, PortValue};
use parking_lot::{Mutex, Once, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A conversion from one payload type to another
pub type ConversionFn = Arc<dyn Fn(&PortValue) -> Result<PortValue, ConversionError> + Send + Sync>;

/// A resolved conversion attached to an edge
#[derive(Clone)]
pub struct Converter {
    from: PortType,
    to: PortType,
    func: ConversionFn,
}

impl Converter {
    /// Source payload type
    pub fn from_type(&self) -> &PortType {
        &self.from
    }

    /// Destination payload type
    pub fn to_type(&self) -> &PortType {
        &self.to
    }

    /// Apply the conversion
    pub fn apply(&self, value: &PortValue) -> Result<PortValue, ConversionError> {
        (self.func)(value)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Conversions and incompatibilities, as filled in by adapter sources
#[derive(Default)]
pub struct AdapterTable {
    conversions: HashMap<(PortType, PortType), ConversionFn>,
    incompatible: HashSet<(PortType, PortType)>,
}

impl AdapterTable {
    /// Register a conversion, replacing any previous one for the same pair
    pub fn register_conversion<F>(&mut self, from: PortType, to: PortType, func: F)
    where
        F: Fn(&PortValue) -> Result<PortValue, ConversionError> + Send + Sync + 'static,
    {
        self.insert(from, to, Arc::new(func));
    }

    /// Forbid conversions between two types, in both directions
    pub fn register_incompatible(&mut self, a: PortType, b: PortType) {
        self.incompatible.insert((b.clone(), a.clone()));
        self.incompatible.insert((a, b));
    }

    fn insert(&mut self, from: PortType, to: PortType, func: ConversionFn) {
        if self.conversions.insert((from.clone(), to.clone()), func).is_some() {
            tracing::warn!("Overwriting type conversion {} -> {}", from, to);
        }
    }

    fn missing_reverse(&self) -> Vec<(PortType, PortType)> {
        let mut missing: Vec<_> = self
            .conversions
            .keys()
            .filter(|(from, to)| !self.conversions.contains_key(&(to.clone(), from.clone())))
            .cloned()
            .collect();
        missing.sort_by_key(|(from, to)| (from.to_string(), to.to_string()));
        missing
    }
}

/// A source of conversions.
///
/// How sources are discovered is up to the caller; the registry only
/// needs them handed over before the first query.
pub trait TypeAdapter: Send + Sync {
    /// Register the conversions and incompatibilities this source provides
    fn register(&self, table: &mut AdapterTable);
}

/// Process-wide, read-mostly store of type conversions
pub struct TypeAdapterRegistry {
    sources: Mutex<Vec<Box<dyn TypeAdapter>>>,
    table: RwLock<AdapterTable>,
    loaded: Once,
}

impl TypeAdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            table: RwLock::new(AdapterTable::default()),
            loaded: Once::new(),
        }
    }

    /// Create a registry preloaded with [`StandardAdapters`]
    pub fn standard() -> Self {
        Self::new().with_adapter(StandardAdapters)
    }

    /// Add an adapter source, loaded on first use
    pub fn with_adapter(self, adapter: impl TypeAdapter + 'static) -> Self {
        self.sources.lock().push(Box::new(adapter));
        self
    }

    /// Load all pending adapter sources. Runs at most once per registry.
    pub fn ensure_loaded(&self) {
        self.loaded.call_once(|| {
            let sources = std::mem::take(&mut *self.sources.lock());
            let mut table = self.table.write();
            for source in &sources {
                source.register(&mut table);
            }
            for (from, to) in table.missing_reverse() {
                tracing::warn!(
                    "Missing conversion method: there is one for {} to {} but not for {} to {}",
                    from,
                    to,
                    to,
                    from
                );
            }
            tracing::debug!(
                "Loaded {} type conversions from {} adapter sources",
                table.conversions.len(),
                sources.len()
            );
        });
    }

    /// Register a conversion. A conversion for the same pair is overwritten.
    pub fn register_conversion<F>(&self, from: PortType, to: PortType, func: F)
    where
        F: Fn(&PortValue) -> Result<PortValue, ConversionError> + Send + Sync + 'static,
    {
        self.ensure_loaded();
        let mut table = self.table.write();
        if !table.conversions.contains_key(&(to.clone(), from.clone())) {
            tracing::warn!("Registered conversion {} -> {} has no reverse conversion", from, to);
        }
        table.register_conversion(from, to, func);
    }

    /// Forbid conversions between two types, in both directions
    pub fn register_incompatible(&self, a: PortType, b: PortType) {
        self.ensure_loaded();
        self.table.write().register_incompatible(a, b);
    }

    /// Whether the pair has been explicitly forbidden
    pub fn is_incompatible(&self, from: &PortType, to: &PortType) -> bool {
        self.ensure_loaded();
        self.table
            .read()
            .incompatible
            .contains(&(from.clone(), to.clone()))
    }

    /// Whether a value of type `from` can be delivered to a port of type `to`
    pub fn can_convert(&self, from: &PortType, to: &PortType) -> bool {
        if self.is_incompatible(from, to) {
            return false;
        }
        from == to || self.table.read().conversions.contains_key(&(from.clone(), to.clone()))
    }

    /// Resolve the converter for a pair of distinct types.
    ///
    /// Returns `None` when the types are equal, incompatible, or have no
    /// registered conversion.
    pub fn resolve(&self, from: &PortType, to: &PortType) -> Option<Converter> {
        if from == to || self.is_incompatible(from, to) {
            return None;
        }
        let table = self.table.read();
        table
            .conversions
            .get(&(from.clone(), to.clone()))
            .map(|func| Converter {
                from: from.clone(),
                to: to.clone(),
                func: Arc::clone(func),
            })
    }

    /// Convert a value using the exact-pair conversion
    pub fn convert(
        &self,
        value: &PortValue,
        from: &PortType,
        to: &PortType,
    ) -> Result<PortValue, ConversionError> {
        if self.is_incompatible(from, to) {
            return Err(ConversionError::Incompatible {
                from: from.clone(),
                to: to.clone(),
            });
        }
        if from == to {
            return Ok(value.clone());
        }
        let func = self
            .table
            .read()
            .conversions
            .get(&(from.clone(), to.clone()))
            .cloned()
            .ok_or_else(|| ConversionError::ConversionNotFound {
                from: from.clone(),
                to: to.clone(),
            })?;
        func(value)
    }

    /// Number of registered conversions
    pub fn conversion_count(&self) -> usize {
        self.ensure_loaded();
        self.table.read().conversions.len()
    }
}

impl Default for TypeAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Error when converting a value between payload types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    /// No conversion registered for the pair
    #[error("No conversion from {from} to {to}")]
    ConversionNotFound {
        /// Source type
        from: PortType,
        /// Destination type
        to: PortType,
    },

    /// The pair is explicitly incompatible
    #[error("Types {from} and {to} are incompatible")]
    Incompatible {
        /// Source type
        from: PortType,
        /// Destination type
        to: PortType,
    },

    /// The conversion function rejected the value
    #[error("Conversion failed: {0}")]
    Failed(String),
}

fn unexpected(value: &PortValue, expected: PortType) -> ConversionError {
    ConversionError::Failed(format!("expected {expected}, got {}", value.port_type()))
}

/// Implicit numeric, vector and color conversions
pub struct StandardAdapters;

impl TypeAdapter for StandardAdapters {
    fn register(&self, table: &mut AdapterTable) {
        use PortType as T;
        use PortValue as V;

        // Numeric conversions
        table.register_conversion(T::Int, T::Float, |v| match v {
            V::Int(i) => Ok(V::Float(*i as f32)),
            other => Err(unexpected(other, T::Int)),
        });
        table.register_conversion(T::Float, T::Int, |v| match v {
            V::Float(f) => Ok(V::Int(f.round() as i64)),
            other => Err(unexpected(other, T::Float)),
        });

        // Scalar broadcast and the reverse swizzle to x
        table.register_conversion(T::Float, T::Vector2, |v| match v {
            V::Float(f) => Ok(V::Vector2([*f; 2])),
            other => Err(unexpected(other, T::Float)),
        });
        table.register_conversion(T::Vector2, T::Float, |v| match v {
            V::Vector2(a) => Ok(V::Float(a[0])),
            other => Err(unexpected(other, T::Vector2)),
        });
        table.register_conversion(T::Float, T::Vector3, |v| match v {
            V::Float(f) => Ok(V::Vector3([*f; 3])),
            other => Err(unexpected(other, T::Float)),
        });
        table.register_conversion(T::Vector3, T::Float, |v| match v {
            V::Vector3(a) => Ok(V::Float(a[0])),
            other => Err(unexpected(other, T::Vector3)),
        });
        table.register_conversion(T::Float, T::Vector4, |v| match v {
            V::Float(f) => Ok(V::Vector4([*f; 4])),
            other => Err(unexpected(other, T::Float)),
        });
        table.register_conversion(T::Vector4, T::Float, |v| match v {
            V::Vector4(a) => Ok(V::Float(a[0])),
            other => Err(unexpected(other, T::Vector4)),
        });

        // Vector widening pads with zero, narrowing truncates
        table.register_conversion(T::Vector2, T::Vector3, |v| match v {
            V::Vector2([x, y]) => Ok(V::Vector3([*x, *y, 0.0])),
            other => Err(unexpected(other, T::Vector2)),
        });
        table.register_conversion(T::Vector3, T::Vector2, |v| match v {
            V::Vector3([x, y, _]) => Ok(V::Vector2([*x, *y])),
            other => Err(unexpected(other, T::Vector3)),
        });
        table.register_conversion(T::Vector2, T::Vector4, |v| match v {
            V::Vector2([x, y]) => Ok(V::Vector4([*x, *y, 0.0, 0.0])),
            other => Err(unexpected(other, T::Vector2)),
        });
        table.register_conversion(T::Vector4, T::Vector2, |v| match v {
            V::Vector4([x, y, _, _]) => Ok(V::Vector2([*x, *y])),
            other => Err(unexpected(other, T::Vector4)),
        });
        table.register_conversion(T::Vector3, T::Vector4, |v| match v {
            V::Vector3([x, y, z]) => Ok(V::Vector4([*x, *y, *z, 0.0])),
            other => Err(unexpected(other, T::Vector3)),
        });
        table.register_conversion(T::Vector4, T::Vector3, |v| match v {
            V::Vector4([x, y, z, _]) => Ok(V::Vector3([*x, *y, *z])),
            other => Err(unexpected(other, T::Vector4)),
        });

        // Color conversions
        table.register_conversion(T::Color, T::Vector4, |v| match v {
            V::Color(c) => Ok(V::Vector4(*c)),
            other => Err(unexpected(other, T::Color)),
        });
        table.register_conversion(T::Vector4, T::Color, |v| match v {
            V::Vector4(c) => Ok(V::Color(*c)),
            other => Err(unexpected(other, T::Vector4)),
        });

        // Text
        table.register_conversion(T::Float, T::String, |v| match v {
            V::Float(f) => Ok(V::String(f.to_string())),
            other => Err(unexpected(other, T::Float)),
        });
        table.register_conversion(T::String, T::Float, |v| match v {
            V::String(s) => s
                .trim()
                .parse::<f32>()
                .map(V::Float)
                .map_err(|e| ConversionError::Failed(format!("'{s}' is not a float: {e}"))),
            other => Err(unexpected(other, T::String)),
        });
        table.register_conversion(T::Int, T::String, |v| match v {
            V::Int(i) => Ok(V::String(i.to_string())),
            other => Err(unexpected(other, T::Int)),
        });
        table.register_conversion(T::String, T::Int, |v| match v {
            V::String(s) => s
                .trim()
                .parse::<i64>()
                .map(V::Int)
                .map_err(|e| ConversionError::Failed(format!("'{s}' is not an integer: {e}"))),
            other => Err(unexpected(other, T::String)),
        });
        table.register_conversion(T::Bool, T::String, |v| match v {
            V::Bool(b) => Ok(V::String(b.to_string())),
            other => Err(unexpected(other, T::Bool)),
        });
        table.register_conversion(T::String, T::Bool, |v| match v {
            V::String(s) => s
                .trim()
                .parse::<bool>()
                .map(V::Bool)
                .map_err(|e| ConversionError::Failed(format!("'{s}' is not a bool: {e}"))),
            other => Err(unexpected(other, T::String)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn float_to_string(v: &PortValue) -> Result<PortValue, ConversionError> {
        match v {
            PortValue::Float(f) => Ok(PortValue::String(format!("{f:.1}"))),
            other => Err(unexpected(other, PortType::Float)),
        }
    }

    #[test]
    fn test_identity_is_always_convertible() {
        let registry = TypeAdapterRegistry::new();
        assert!(registry.can_convert(&PortType::Float, &PortType::Float));
        assert!(!registry.can_convert(&PortType::Float, &PortType::String));
        assert_eq!(
            registry.convert(&PortValue::Float(2.0), &PortType::Float, &PortType::Float),
            Ok(PortValue::Float(2.0))
        );
    }

    #[test]
    fn test_exact_pair_only() {
        let registry = TypeAdapterRegistry::new();
        registry.register_conversion(PortType::Float, PortType::String, float_to_string);

        assert!(registry.can_convert(&PortType::Float, &PortType::String));
        assert_eq!(
            registry.convert(&PortValue::Float(1.5), &PortType::Float, &PortType::String),
            Ok(PortValue::String("1.5".to_string()))
        );

        let err = registry
            .convert(&PortValue::String("1.5".into()), &PortType::String, &PortType::Float)
            .unwrap_err();
        assert!(matches!(err, ConversionError::ConversionNotFound { .. }));
    }

    #[test]
    fn test_no_transitive_chaining() {
        let registry = TypeAdapterRegistry::new();
        registry.register_conversion(PortType::Int, PortType::Float, |v| Ok(v.clone()));
        registry.register_conversion(PortType::Float, PortType::String, float_to_string);
        assert!(!registry.can_convert(&PortType::Int, &PortType::String));
    }

    #[test]
    fn test_incompatible_overrides_conversion() {
        let registry = TypeAdapterRegistry::standard();
        assert!(registry.can_convert(&PortType::Float, &PortType::Int));

        registry.register_incompatible(PortType::Float, PortType::Int);
        assert!(!registry.can_convert(&PortType::Float, &PortType::Int));
        assert!(!registry.can_convert(&PortType::Int, &PortType::Float));
        assert!(registry.resolve(&PortType::Float, &PortType::Int).is_none());
        assert!(matches!(
            registry.convert(&PortValue::Float(1.0), &PortType::Float, &PortType::Int),
            Err(ConversionError::Incompatible { .. })
        ));
    }

    struct CountingAdapter(Arc<AtomicUsize>);

    impl TypeAdapter for CountingAdapter {
        fn register(&self, table: &mut AdapterTable) {
            self.0.fetch_add(1, Ordering::SeqCst);
            table.register_conversion(PortType::Bool, PortType::Int, |v| match v {
                PortValue::Bool(b) => Ok(PortValue::Int(i64::from(*b))),
                other => Err(unexpected(other, PortType::Bool)),
            });
        }
    }

    #[test]
    fn test_lazy_one_shot_loading() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(TypeAdapterRegistry::new().with_adapter(CountingAdapter(loads.clone())));
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.can_convert(&PortType::Bool, &PortType::Int))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.conversion_count(), 1);
    }

    #[test]
    fn test_overwrite_replaces_conversion() {
        let registry = TypeAdapterRegistry::new();
        registry.register_conversion(PortType::Float, PortType::String, float_to_string);
        registry.register_conversion(PortType::Float, PortType::String, |_| {
            Ok(PortValue::String("replaced".into()))
        });
        assert_eq!(registry.conversion_count(), 1);
        assert_eq!(
            registry.convert(&PortValue::Float(1.0), &PortType::Float, &PortType::String),
            Ok(PortValue::String("replaced".to_string()))
        );
    }

    #[test]
    fn test_standard_adapters_are_symmetric() {
        let registry = TypeAdapterRegistry::standard();
        registry.ensure_loaded();
        assert!(registry.table.read().missing_reverse().is_empty());
        assert_eq!(
            registry.convert(&PortValue::Float(0.5), &PortType::Float, &PortType::Vector3),
            Ok(PortValue::Vector3([0.5; 3]))
        );
        assert!(matches!(
            registry.convert(&PortValue::String("abc".into()), &PortType::String, &PortType::Float),
            Err(ConversionError::Failed(_))
        ));
    }
}
