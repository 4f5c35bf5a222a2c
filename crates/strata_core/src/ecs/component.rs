//! # Component System
//!
//! Components are plain values attached to entities. Any `'static` type that
//! is thread-safe, debuggable and comparable qualifies; there is nothing to
//! implement.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Object-safe view of a component value.
///
/// Blanket-implemented for every `T: Any + Send + Sync + Debug + PartialEq`.
///
/// # Example
///
/// ```rust
/// use std::any::TypeId;
/// use strata_core::Component;
///
/// #[derive(Debug, PartialEq)]
/// struct Health(u32);
///
/// let component: &dyn Component = &Health(10);
/// assert_eq!(component.component_type(), TypeId::of::<Health>());
/// assert!(component.dyn_eq(&Health(10)));
/// ```
pub trait Component: Any + Send + Sync + fmt::Debug {
    /// `TypeId` of the concrete component type.
    fn component_type(&self) -> TypeId;

    /// Name of the concrete component type.
    fn type_name(&self) -> &'static str;

    /// Upcast for downcasting by reference.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting a shared handle.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Value equality across erased components.
    fn dyn_eq(&self, other: &dyn Component) -> bool;
}

impl<T> Component for T
where
    T: Any + Send + Sync + fmt::Debug + PartialEq,
{
    #[inline]
    fn component_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn dyn_eq(&self, other: &dyn Component) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Downcasts a shared component to its concrete type.
pub(crate) fn downcast_arc<T: Component>(component: &Arc<dyn Component>) -> Option<Arc<T>> {
    Arc::clone(component).into_any_arc().downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_component_type_is_concrete() {
        let component: Arc<dyn Component> = Arc::new(Position { x: 1.0, y: 2.0 });
        assert_eq!(component.component_type(), TypeId::of::<Position>());
        assert!(component.type_name().ends_with("Position"));
    }

    #[test]
    fn test_dyn_eq() {
        let a: Arc<dyn Component> = Arc::new(Position { x: 1.0, y: 2.0 });
        let same = Position { x: 1.0, y: 2.0 };
        let other_type = Velocity { x: 1.0, y: 2.0 };
        assert!(a.dyn_eq(&same));
        assert!(!a.dyn_eq(&other_type));
        assert!(!a.dyn_eq(&Position { x: 0.0, y: 2.0 }));
    }

    #[test]
    fn test_downcast_arc() {
        let a: Arc<dyn Component> = Arc::new(Velocity { x: 3.0, y: 4.0 });
        let velocity = downcast_arc::<Velocity>(&a).unwrap();
        assert_eq!(velocity.x, 3.0);
        assert!(downcast_arc::<Position>(&a).is_none());
    }
}
