//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have **no identity**: two instances with the same attributes
/// are interchangeable. `AspectRatio` and `Canvas` are value objects; a stored
/// `Generation` is an entity.
///
/// The trait requires:
/// - **Clone**: values are cheap to copy
/// - **PartialEq**: compared by attribute values
/// - **Debug**: loggable
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
