//! The read-only class hierarchy oracle.
//!
//! Every stage that needs subtype information receives a `&dyn ClassOracle`. The
//! oracle is never mutated during decompilation, so one instance can serve every
//! method of a batch.

use std::collections::HashMap;

use bitflags::bitflags;

/// Internal name of the root class.
pub const OBJECT: &str = "java/lang/Object";
/// Internal name of the root of all exceptions.
pub const THROWABLE: &str = "java/lang/Throwable";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Class properties relevant to type merging
    pub struct ClassFlags: u32 {
        /// The type is an interface
        const INTERFACE = 0x0200;
        /// The class cannot be subclassed
        const FINAL = 0x0010;
    }
}

/// Answers subtype queries about classes outside the method being decompiled.
pub trait ClassOracle {
    /// Returns `true` if `sub` is `sup` or extends it, directly or transitively.
    ///
    /// Only the superclass chain is considered; implemented interfaces are not.
    fn is_subclass(&self, sub: &str, sup: &str) -> bool;

    /// The superclass chain of `name`, nearest first and ending at
    /// `java/lang/Object`. Empty for `java/lang/Object` itself.
    fn supertypes(&self, name: &str) -> Vec<String>;

    /// Flags of `name`. Unknown classes have no flags.
    fn flags(&self, name: &str) -> ClassFlags;
}

/// Returns the package part of an internal class name (`java/lang` for
/// `java/lang/String`).
#[must_use]
pub fn package_of(name: &str) -> &str {
    name.rfind('/').map_or("", |i| &name[..i])
}

#[derive(Debug, Clone)]
struct ClassEntry {
    superclass: Option<String>,
    flags: ClassFlags,
}

/// An in-memory [`ClassOracle`].
///
/// Classes that were never added are treated as direct subclasses of
/// `java/lang/Object` with no flags.
///
/// # Examples
///
/// ```rust
/// use classflow::bytecode::{ClassHierarchy, ClassOracle};
///
/// let mut hierarchy = ClassHierarchy::with_java_lang();
/// hierarchy.add_class("app/E1", "java/lang/Exception");
/// hierarchy.add_class("app/E2", "app/E1");
///
/// assert!(hierarchy.is_subclass("app/E2", "java/lang/Throwable"));
/// assert_eq!(hierarchy.supertypes("app/E2")[0], "app/E1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    classes: HashMap<String, ClassEntry>,
}

impl ClassHierarchy {
    /// Creates a hierarchy containing only `java/lang/Object`.
    #[must_use]
    pub fn new() -> Self {
        let mut hierarchy = ClassHierarchy {
            classes: HashMap::new(),
        };
        hierarchy.classes.insert(
            OBJECT.to_string(),
            ClassEntry {
                superclass: None,
                flags: ClassFlags::empty(),
            },
        );
        hierarchy
    }

    /// Creates a hierarchy with the `java.lang` classes the verifier and the
    /// exception-set algebra refer to.
    #[must_use]
    pub fn with_java_lang() -> Self {
        let mut hierarchy = Self::new();
        hierarchy
            .add_class(THROWABLE, OBJECT)
            .add_class("java/lang/Exception", THROWABLE)
            .add_class("java/lang/Error", THROWABLE)
            .add_class("java/lang/RuntimeException", "java/lang/Exception")
            .add_class("java/lang/ArithmeticException", "java/lang/RuntimeException")
            .add_class("java/lang/NullPointerException", "java/lang/RuntimeException")
            .add_class("java/lang/ClassCastException", "java/lang/RuntimeException")
            .add_class("java/lang/ArrayStoreException", "java/lang/RuntimeException")
            .add_class("java/lang/IllegalMonitorStateException", "java/lang/RuntimeException")
            .add_class("java/lang/NegativeArraySizeException", "java/lang/RuntimeException")
            .add_class("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException")
            .add_class(
                "java/lang/ArrayIndexOutOfBoundsException",
                "java/lang/IndexOutOfBoundsException",
            )
            .add_final_class("java/lang/String", OBJECT)
            .add_final_class("java/lang/Class", OBJECT)
            .add_interface("java/lang/Cloneable")
            .add_interface("java/io/Serializable")
            .add_interface("java/lang/Runnable");
        hierarchy
    }

    /// Adds a class with the given superclass.
    pub fn add_class(&mut self, name: &str, superclass: &str) -> &mut Self {
        self.insert(name, Some(superclass), ClassFlags::empty())
    }

    /// Adds a `final` class with the given superclass.
    pub fn add_final_class(&mut self, name: &str, superclass: &str) -> &mut Self {
        self.insert(name, Some(superclass), ClassFlags::FINAL)
    }

    /// Adds an interface. Interfaces extend `java/lang/Object` for merging purposes.
    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        self.insert(name, Some(OBJECT), ClassFlags::INTERFACE)
    }

    fn insert(&mut self, name: &str, superclass: Option<&str>, flags: ClassFlags) -> &mut Self {
        self.classes.insert(
            name.to_string(),
            ClassEntry {
                superclass: superclass.map(str::to_string),
                flags,
            },
        );
        self
    }

    fn superclass_of<'a>(&'a self, name: &str) -> Option<&'a str> {
        if name == OBJECT {
            return None;
        }
        match self.classes.get(name) {
            Some(entry) => entry.superclass.as_deref(),
            None => Some(OBJECT),
        }
    }
}

impl ClassOracle for ClassHierarchy {
    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        if sup == OBJECT || sub == sup {
            return true;
        }
        // Bounded by the class count so a cyclic table cannot hang the walk
        let mut current = sub;
        for _ in 0..=self.classes.len() {
            match self.superclass_of(current) {
                Some(next) if next == sup => return true,
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    fn supertypes(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = name;
        for _ in 0..=self.classes.len() {
            match self.superclass_of(current) {
                Some(next) => {
                    chain.push(next.to_string());
                    current = next;
                }
                None => break,
            }
        }
        chain
    }

    fn flags(&self, name: &str) -> ClassFlags {
        self.classes
            .get(name)
            .map_or(ClassFlags::empty(), |entry| entry.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subclass_walk() {
        let mut h = ClassHierarchy::with_java_lang();
        h.add_class("a/E1", "java/lang/Exception").add_class("a/E2", "a/E1");

        assert!(h.is_subclass("a/E2", "a/E1"));
        assert!(h.is_subclass("a/E2", "a/E2"));
        assert!(!h.is_subclass("a/E1", "a/E2"));
        assert!(h.is_subclass("unknown/Thing", OBJECT));
        assert!(!h.is_subclass("unknown/Thing", THROWABLE));
    }

    #[test]
    fn test_supertypes_order() {
        let h = ClassHierarchy::with_java_lang();
        assert_eq!(
            h.supertypes("java/lang/ArithmeticException"),
            vec![
                "java/lang/RuntimeException",
                "java/lang/Exception",
                THROWABLE,
                OBJECT
            ]
        );
        assert!(h.supertypes(OBJECT).is_empty());
        assert_eq!(h.supertypes("unknown/Thing"), vec![OBJECT]);
    }

    #[test]
    fn test_flags_and_packages() {
        let h = ClassHierarchy::with_java_lang();
        assert!(h.flags("java/lang/Runnable").contains(ClassFlags::INTERFACE));
        assert!(h.flags("java/lang/String").contains(ClassFlags::FINAL));
        assert!(h.flags("nope").is_empty());
        assert_eq!(package_of("java/lang/String"), "java/lang");
        assert_eq!(package_of("Toplevel"), "");
    }
}
