// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Dependency specs and their realization
//!
//! A dependency spec is the second half of a descriptor: none, a single
//! reference (possibly variant-wrapped), an ordered tuple of references, a
//! `Vec`, or a string-keyed record. The resolver realizes the spec by walking
//! its structure and producing one [`Realized`] slot per leaf; the spec then
//! reassembles those slots into its typed output, preserving shape.

use crate::accessor::{Accessor, AnyAccessor};
use crate::error::{Error, ErrorCode, Result};
use crate::executor::{Executor, ExecutorCore, Lazy, Reactive, Static};
use crate::store::{downcast, AnyValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How a dependent realizes a referenced descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Resolve and pass the value.
    Main,
    /// Pass the accessor without resolving.
    Lazy,
    /// Subscribe the dependent, resolve, and pass the value.
    Reactive,
    /// Resolve, then pass the accessor.
    Static,
}

/// One erased leaf of a dependency spec.
#[derive(Clone)]
pub struct DepRef {
    pub(crate) core: Arc<ExecutorCore>,
    pub(crate) kind: RefKind,
}

/// The resolver's product for one dependency leaf.
#[derive(Clone)]
pub enum Realized {
    /// Resolved value (main and reactive references).
    Value(AnyValue),
    /// Stable handle (lazy and static references).
    Accessor(AnyAccessor),
}

fn arity_mismatch() -> Error {
    Error::system(
        ErrorCode::Internal,
        "realized dependency count does not match the dependency spec",
    )
}

fn expected_value(name: &str) -> Error {
    Error::system(
        ErrorCode::TypeMismatch,
        format!("dependency `{name}` realized as an accessor where a value was expected"),
    )
}

fn expected_accessor(name: &str) -> Error {
    Error::system(
        ErrorCode::TypeMismatch,
        format!("dependency `{name}` realized as a value where an accessor was expected"),
    )
}

/// A single reference usable as a leaf of a dependency spec.
pub trait DependencyRef: Clone + Send + Sync + 'static {
    /// What the dependent's factory receives for this leaf.
    type Output: Clone + Send + Sync + 'static;

    /// The erased reference the resolver walks.
    fn dep_ref(&self) -> DepRef;

    /// Reassemble the typed view from the resolver's product.
    fn realize_one(&self, realized: &Realized) -> Result<Self::Output>;
}

impl<T: Send + Sync + 'static> DependencyRef for Executor<T> {
    type Output = Arc<T>;

    fn dep_ref(&self) -> DepRef {
        DepRef {
            core: self.core().clone(),
            kind: RefKind::Main,
        }
    }

    fn realize_one(&self, realized: &Realized) -> Result<Self::Output> {
        match realized {
            Realized::Value(value) => downcast(value.clone(), &self.core().debug_name()),
            Realized::Accessor(_) => Err(expected_value(&self.core().debug_name())),
        }
    }
}

impl<T: Send + Sync + 'static> DependencyRef for Reactive<T> {
    type Output = Arc<T>;

    fn dep_ref(&self) -> DepRef {
        DepRef {
            core: self.executor().core().clone(),
            kind: RefKind::Reactive,
        }
    }

    fn realize_one(&self, realized: &Realized) -> Result<Self::Output> {
        match realized {
            Realized::Value(value) => downcast(value.clone(), &self.executor().core().debug_name()),
            Realized::Accessor(_) => Err(expected_value(&self.executor().core().debug_name())),
        }
    }
}

impl<T: Send + Sync + 'static> DependencyRef for Lazy<T> {
    type Output = Accessor<T>;

    fn dep_ref(&self) -> DepRef {
        DepRef {
            core: self.executor().core().clone(),
            kind: RefKind::Lazy,
        }
    }

    fn realize_one(&self, realized: &Realized) -> Result<Self::Output> {
        match realized {
            Realized::Accessor(raw) => Ok(Accessor::from_any(raw.clone())),
            Realized::Value(_) => Err(expected_accessor(&self.executor().core().debug_name())),
        }
    }
}

impl<T: Send + Sync + 'static> DependencyRef for Static<T> {
    type Output = Accessor<T>;

    fn dep_ref(&self) -> DepRef {
        DepRef {
            core: self.executor().core().clone(),
            kind: RefKind::Static,
        }
    }

    fn realize_one(&self, realized: &Realized) -> Result<Self::Output> {
        match realized {
            Realized::Accessor(raw) => Ok(Accessor::from_any(raw.clone())),
            Realized::Value(_) => Err(expected_accessor(&self.executor().core().debug_name())),
        }
    }
}

/// A whole dependency spec: the shape the factory's first argument takes.
pub trait Dependencies: Send + Sync + 'static {
    /// Realized shape handed to the factory.
    type Output: Send + 'static;

    /// Erased leaves, in realization order.
    fn dep_refs(&self) -> Vec<DepRef>;

    /// Reassemble the typed output from the resolver's products, which arrive
    /// in `dep_refs` order.
    fn realize(&self, realized: &[Realized]) -> Result<Self::Output>;
}

impl Dependencies for () {
    type Output = ();

    fn dep_refs(&self) -> Vec<DepRef> {
        Vec::new()
    }

    fn realize(&self, _realized: &[Realized]) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_dependencies_for_single {
    ($name:ident) => {
        impl<T: Send + Sync + 'static> Dependencies for $name<T> {
            type Output = <$name<T> as DependencyRef>::Output;

            fn dep_refs(&self) -> Vec<DepRef> {
                vec![DependencyRef::dep_ref(self)]
            }

            fn realize(&self, realized: &[Realized]) -> Result<Self::Output> {
                let slot = realized.first().ok_or_else(arity_mismatch)?;
                self.realize_one(slot)
            }
        }
    };
}

impl_dependencies_for_single!(Executor);
impl_dependencies_for_single!(Lazy);
impl_dependencies_for_single!(Reactive);
impl_dependencies_for_single!(Static);

macro_rules! impl_dependencies_for_tuple {
    ($( $ref:ident : $idx:tt ),+) => {
        impl<$( $ref: DependencyRef ),+> Dependencies for ($( $ref, )+) {
            type Output = ($( $ref::Output, )+);

            fn dep_refs(&self) -> Vec<DepRef> {
                vec![$( self.$idx.dep_ref() ),+]
            }

            fn realize(&self, realized: &[Realized]) -> Result<Self::Output> {
                Ok((
                    $( self.$idx.realize_one(realized.get($idx).ok_or_else(arity_mismatch)?)?, )+
                ))
            }
        }
    };
}

impl_dependencies_for_tuple!(R0: 0);
impl_dependencies_for_tuple!(R0: 0, R1: 1);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2, R3: 3);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2, R3: 3, R4: 4);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2, R3: 3, R4: 4, R5: 5);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2, R3: 3, R4: 4, R5: 5, R6: 6);
impl_dependencies_for_tuple!(R0: 0, R1: 1, R2: 2, R3: 3, R4: 4, R5: 5, R6: 6, R7: 7);

impl<R: DependencyRef> Dependencies for Vec<R> {
    type Output = Vec<R::Output>;

    fn dep_refs(&self) -> Vec<DepRef> {
        self.iter().map(DependencyRef::dep_ref).collect()
    }

    fn realize(&self, realized: &[Realized]) -> Result<Self::Output> {
        if realized.len() != self.len() {
            return Err(arity_mismatch());
        }
        self.iter()
            .zip(realized)
            .map(|(leaf, slot)| leaf.realize_one(slot))
            .collect()
    }
}

impl<R: DependencyRef> Dependencies for BTreeMap<String, R> {
    type Output = BTreeMap<String, R::Output>;

    fn dep_refs(&self) -> Vec<DepRef> {
        self.values().map(DependencyRef::dep_ref).collect()
    }

    fn realize(&self, realized: &[Realized]) -> Result<Self::Output> {
        if realized.len() != self.len() {
            return Err(arity_mismatch());
        }
        self.iter()
            .zip(realized)
            .map(|((name, leaf), slot)| Ok((name.clone(), leaf.realize_one(slot)?)))
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::provide;
    use crate::store::any_value;

    #[test]
    fn test_tuple_spec_preserves_shape() {
        let a = provide(|_ctl| async { Ok(1u32) });
        let b = provide(|_ctl| async { Ok("two".to_string()) });
        let spec = (a, b);
        let refs = spec.dep_refs();
        assert_eq!(refs.len(), 2);

        let (x, y) = spec
            .realize(&[
                Realized::Value(any_value(1u32)),
                Realized::Value(any_value("two".to_string())),
            ])
            .unwrap();
        assert_eq!(*x, 1);
        assert_eq!(*y, "two");
    }

    #[test]
    fn test_record_spec_preserves_keys() {
        let spec: BTreeMap<String, _> = [
            ("left".to_string(), provide(|_ctl| async { Ok(1u32) })),
            ("right".to_string(), provide(|_ctl| async { Ok(2u32) })),
        ]
        .into_iter()
        .collect();

        let realized = spec
            .realize(&[
                Realized::Value(any_value(1u32)),
                Realized::Value(any_value(2u32)),
            ])
            .unwrap();
        assert_eq!(*realized["left"], 1);
        assert_eq!(*realized["right"], 2);
    }

    #[test]
    fn test_vec_spec_realizes_in_order() {
        let spec = vec![
            provide(|_ctl| async { Ok(10u32) }),
            provide(|_ctl| async { Ok(20u32) }),
        ];
        let realized = spec
            .realize(&[
                Realized::Value(any_value(10u32)),
                Realized::Value(any_value(20u32)),
            ])
            .unwrap();
        assert_eq!(realized.iter().map(|v| **v).collect::<Vec<_>>(), vec![10, 20]);
    }

    #[test]
    fn test_arity_mismatch_is_detected() {
        let spec = vec![provide(|_ctl| async { Ok(1u32) })];
        let err = spec.realize(&[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_wrong_slot_type_is_detected() {
        let a = provide(|_ctl| async { Ok(1u32) });
        let err = a
            .realize(&[Realized::Value(any_value("text".to_string()))])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }

    #[test]
    fn test_variant_kinds_flow_into_refs() {
        let a = provide(|_ctl| async { Ok(1u32) });
        assert_eq!(a.lazy().dep_ref().kind, RefKind::Lazy);
        assert_eq!(a.reactive().dep_ref().kind, RefKind::Reactive);
        assert_eq!(a.static_().dep_ref().kind, RefKind::Static);
        assert_eq!(DependencyRef::dep_ref(&a).kind, RefKind::Main);
    }
}
