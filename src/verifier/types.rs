//! Verification types and the type merge.
//!
//! [`VerifierType`] follows the JVM verification type hierarchy. Every stack slot and
//! local variable at every reachable instruction gets one of these. Merging two
//! types at a control-flow join yields their least common supertype in the lattice,
//! or [`VerifierType::Invalid`] when no valid common type exists.

use std::fmt;

use crate::bytecode::{BaseType, ClassFlags, ClassOracle, TypeDesc, ValueKind, OBJECT};

/// Super types shared by all arrays.
const ARRAY_SUPERTYPES: [&str; 3] = [OBJECT, "java/lang/Cloneable", "java/io/Serializable"];

/// A verifier-level type.
///
/// `Byte`, `Short`, `Char` and `Boolean` only describe field, array element and
/// descriptor types. Values on the stack and in locals always use `Int` for them, see
/// [`VerifierType::as_stack`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerifierType {
    /// `int`
    Int,
    /// `float`
    Float,
    /// `long`, one stack entry of category 2
    Long,
    /// `double`, one stack entry of category 2
    Double,
    /// `byte`
    Byte,
    /// `short`
    Short,
    /// `char`
    Char,
    /// `boolean`
    Boolean,
    /// An initialized class or array type
    Reference(TypeDesc),
    /// The `null` reference
    Null,
    /// Result of the `new` at this address, before its constructor ran
    UninitNew(u32),
    /// `this` inside a constructor before the super constructor ran
    UninitThis,
    /// Return address pushed by a `jsr` to the subroutine at this address
    ReturnAddress(u32),
    /// Unusable: conflicting merge, or the upper half of a long or double local
    Invalid,
}

impl VerifierType {
    /// `java/lang/Object`
    #[must_use]
    pub fn object() -> Self {
        VerifierType::Reference(TypeDesc::object(OBJECT))
    }

    /// A class type.
    pub fn class(name: impl Into<String>) -> Self {
        VerifierType::Reference(TypeDesc::Object(name.into()))
    }

    /// The type of a value described by `desc`.
    #[must_use]
    pub fn from_desc(desc: &TypeDesc) -> Self {
        match desc {
            TypeDesc::Base(BaseType::Int) => VerifierType::Int,
            TypeDesc::Base(BaseType::Float) => VerifierType::Float,
            TypeDesc::Base(BaseType::Long) => VerifierType::Long,
            TypeDesc::Base(BaseType::Double) => VerifierType::Double,
            TypeDesc::Base(BaseType::Byte) => VerifierType::Byte,
            TypeDesc::Base(BaseType::Short) => VerifierType::Short,
            TypeDesc::Base(BaseType::Char) => VerifierType::Char,
            TypeDesc::Base(BaseType::Boolean) => VerifierType::Boolean,
            TypeDesc::Object(_) | TypeDesc::Array(_) => VerifierType::Reference(desc.clone()),
        }
    }

    /// Widens the sub-int primitive types to `Int`.
    #[must_use]
    pub fn as_stack(self) -> Self {
        match self {
            VerifierType::Byte | VerifierType::Short | VerifierType::Char | VerifierType::Boolean => {
                VerifierType::Int
            }
            other => other,
        }
    }

    /// Stack slots taken by this type.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self {
            VerifierType::Long | VerifierType::Double => 2,
            _ => 1,
        }
    }

    /// Returns `true` for anything an `aload` may push.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            VerifierType::Reference(_)
                | VerifierType::Null
                | VerifierType::UninitNew(_)
                | VerifierType::UninitThis
        )
    }

    /// Returns `true` for uninitialized object markers.
    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, VerifierType::UninitNew(_) | VerifierType::UninitThis)
    }

    /// Returns `true` if the type is usable as a value of `kind`.
    #[must_use]
    pub fn matches_kind(&self, kind: ValueKind) -> bool {
        match kind {
            ValueKind::Int => matches!(self, VerifierType::Int),
            ValueKind::Long => matches!(self, VerifierType::Long),
            ValueKind::Float => matches!(self, VerifierType::Float),
            ValueKind::Double => matches!(self, VerifierType::Double),
            ValueKind::Reference => self.is_reference(),
        }
    }

    /// Returns `true` if a value of type `self` may be stored where `target` is
    /// expected.
    ///
    /// Any reference is assignable to an interface type, as in the JVM's type
    /// inference verifier; interface conformance is checked at run time.
    #[must_use]
    pub fn is_assignable_to(&self, target: &VerifierType, oracle: &dyn ClassOracle) -> bool {
        let target = target.clone().as_stack();
        match (self, &target) {
            (a, b) if a == b => true,
            (VerifierType::Null, VerifierType::Reference(_)) => true,
            (VerifierType::Reference(from), VerifierType::Reference(to)) => {
                is_desc_assignable(from, to, oracle)
            }
            _ => false,
        }
    }

    /// Merges `incoming` into `self` and returns the result.
    ///
    /// The merge keeps `self` whenever `incoming` is already assignable to it, so an
    /// interface type fixed by an earlier merge is not collapsed to `Object` by a
    /// later one. Classes meet at the nearest common superclass; arrays of different
    /// shapes decay towards `Object[]`; anything else becomes `Invalid`.
    #[must_use]
    pub fn merge(&self, incoming: &VerifierType, oracle: &dyn ClassOracle) -> VerifierType {
        if self == incoming {
            return self.clone();
        }
        match (self, incoming) {
            (VerifierType::Null, VerifierType::Reference(_)) => incoming.clone(),
            (VerifierType::Reference(_), VerifierType::Null) => self.clone(),
            (VerifierType::Reference(current), VerifierType::Reference(other)) => {
                if is_desc_assignable(other, current, oracle) {
                    self.clone()
                } else if !is_interface_desc(other, oracle)
                    && is_desc_assignable(current, other, oracle)
                {
                    incoming.clone()
                } else {
                    VerifierType::Reference(common_supertype(current, other, oracle))
                }
            }
            _ => VerifierType::Invalid,
        }
    }
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierType::Int => write!(f, "int"),
            VerifierType::Float => write!(f, "float"),
            VerifierType::Long => write!(f, "long"),
            VerifierType::Double => write!(f, "double"),
            VerifierType::Byte => write!(f, "byte"),
            VerifierType::Short => write!(f, "short"),
            VerifierType::Char => write!(f, "char"),
            VerifierType::Boolean => write!(f, "boolean"),
            VerifierType::Reference(desc) => write!(f, "{desc}"),
            VerifierType::Null => write!(f, "null"),
            VerifierType::UninitNew(at) => write!(f, "uninitialized({at})"),
            VerifierType::UninitThis => write!(f, "uninitializedThis"),
            VerifierType::ReturnAddress(at) => write!(f, "returnAddress({at})"),
            VerifierType::Invalid => write!(f, "invalid"),
        }
    }
}

/// Assignability between reference descriptors.
pub(crate) fn is_desc_assignable(from: &TypeDesc, to: &TypeDesc, oracle: &dyn ClassOracle) -> bool {
    match (from, to) {
        (_, TypeDesc::Object(name)) if name == OBJECT => true,
        (_, TypeDesc::Object(name)) if oracle.flags(name).contains(ClassFlags::INTERFACE) => true,
        (TypeDesc::Object(a), TypeDesc::Object(b)) => oracle.is_subclass(a, b),
        (TypeDesc::Array(_), TypeDesc::Object(name)) => ARRAY_SUPERTYPES.contains(&name.as_str()),
        (TypeDesc::Array(a), TypeDesc::Array(b)) => match (a.as_ref(), b.as_ref()) {
            (TypeDesc::Base(x), TypeDesc::Base(y)) => x == y,
            (TypeDesc::Base(_), _) | (_, TypeDesc::Base(_)) => false,
            (a, b) => is_desc_assignable(a, b, oracle),
        },
        _ => false,
    }
}

fn is_interface_desc(desc: &TypeDesc, oracle: &dyn ClassOracle) -> bool {
    matches!(desc, TypeDesc::Object(name) if oracle.flags(name).contains(ClassFlags::INTERFACE))
}

/// Views a reference as `(dimensions, element class)`, treating an array of
/// primitives as an `Object` array of one dimension less.
fn reference_shape(desc: &TypeDesc) -> (usize, &str) {
    let dims = desc.dimensions();
    match desc.element() {
        TypeDesc::Object(name) => (dims, name.as_str()),
        _ => (dims.saturating_sub(1), OBJECT),
    }
}

fn wrap_dims(name: String, dims: usize) -> TypeDesc {
    let mut desc = TypeDesc::Object(name);
    for _ in 0..dims {
        desc = TypeDesc::Array(Box::new(desc));
    }
    desc
}

/// Least common supertype of two references neither of which is assignable to the
/// other.
fn common_supertype(a: &TypeDesc, b: &TypeDesc, oracle: &dyn ClassOracle) -> TypeDesc {
    let (dims_a, elem_a) = reference_shape(a);
    let (dims_b, elem_b) = reference_shape(b);

    if dims_a != dims_b {
        return wrap_dims(OBJECT.to_string(), dims_a.min(dims_b));
    }
    wrap_dims(common_superclass(elem_a, elem_b, oracle), dims_a)
}

fn common_superclass(a: &str, b: &str, oracle: &dyn ClassOracle) -> String {
    let is_interface = |n: &str| oracle.flags(n).contains(ClassFlags::INTERFACE);
    if is_interface(a) || is_interface(b) {
        return OBJECT.to_string();
    }
    if oracle.is_subclass(a, b) {
        return b.to_string();
    }
    oracle
        .supertypes(a)
        .into_iter()
        .find(|candidate| oracle.is_subclass(b, candidate))
        .unwrap_or_else(|| OBJECT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ClassHierarchy;

    fn hierarchy() -> ClassHierarchy {
        let mut h = ClassHierarchy::with_java_lang();
        h.add_class("a/Animal", OBJECT)
            .add_class("a/Dog", "a/Animal")
            .add_class("a/Cat", "a/Animal")
            .add_interface("a/Pet");
        h
    }

    fn ty(desc: &str) -> VerifierType {
        VerifierType::from_desc(&TypeDesc::parse(desc).unwrap())
    }

    #[test]
    fn test_merge_classes() {
        let h = hierarchy();
        assert_eq!(ty("La/Dog;").merge(&ty("La/Cat;"), &h), ty("La/Animal;"));
        assert_eq!(ty("La/Dog;").merge(&ty("La/Animal;"), &h), ty("La/Animal;"));
        assert_eq!(VerifierType::Null.merge(&ty("La/Dog;"), &h), ty("La/Dog;"));
        assert_eq!(ty("La/Dog;").merge(&ty("Ljava/lang/String;"), &h), VerifierType::object());
    }

    #[test]
    fn test_merge_interfaces() {
        let h = hierarchy();
        // A fixed interface absorbs later classes
        assert_eq!(ty("La/Pet;").merge(&ty("La/Dog;"), &h), ty("La/Pet;"));
        // A class meeting an interface it is not assignable from collapses to Object
        assert_eq!(ty("La/Dog;").merge(&ty("La/Pet;"), &h), VerifierType::object());
    }

    #[test]
    fn test_merge_arrays() {
        let h = hierarchy();
        assert_eq!(ty("[La/Dog;").merge(&ty("[La/Cat;"), &h), ty("[La/Animal;"));
        assert_eq!(ty("[I").merge(&ty("[F"), &h), VerifierType::object());
        assert_eq!(ty("[[I").merge(&ty("[La/Dog;"), &h), ty("[Ljava/lang/Object;"));
        assert_eq!(ty("[[La/Dog;").merge(&ty("[La/Dog;"), &h), ty("[Ljava/lang/Object;"));
    }

    #[test]
    fn test_merge_is_idempotent_and_rejects_mismatch() {
        let h = hierarchy();
        let merged = ty("La/Dog;").merge(&ty("La/Cat;"), &h);
        assert_eq!(merged.merge(&ty("La/Cat;"), &h), merged);
        assert_eq!(VerifierType::Int.merge(&VerifierType::Float, &h), VerifierType::Invalid);
        assert_eq!(
            VerifierType::UninitNew(3).merge(&VerifierType::UninitNew(7), &h),
            VerifierType::Invalid
        );
    }

    #[test]
    fn test_assignability() {
        let h = hierarchy();
        assert!(ty("La/Dog;").is_assignable_to(&ty("La/Animal;"), &h));
        assert!(!ty("La/Animal;").is_assignable_to(&ty("La/Dog;"), &h));
        assert!(ty("[I").is_assignable_to(&ty("Ljava/lang/Cloneable;"), &h));
        assert!(VerifierType::Int.is_assignable_to(&VerifierType::Byte, &h));
        assert!(!ty("[I").is_assignable_to(&ty("[J"), &h));
        assert!(VerifierType::Null.is_assignable_to(&ty("[I"), &h));
    }
}
