//! Field and method descriptors.
//!
//! The class-file collaborator resolves constant-pool references into descriptor
//! strings such as `[Ljava/lang/String;` or `(IJ)V`. This module parses them into
//! [`TypeDesc`] and [`MethodDescriptor`], which the verifier uses to build the
//! initial frame and to check invocation and return types.

use std::{fmt, iter::Peekable, str::Chars};

use crate::{Error, Result};

/// Primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
}

impl BaseType {
    /// Returns the descriptor character for this type.
    #[must_use]
    pub fn descriptor_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }

    /// Parses a descriptor character.
    #[must_use]
    pub fn from_descriptor_char(c: char) -> Option<Self> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    /// Number of local variable slots a value of this type occupies.
    #[must_use]
    pub fn width(self) -> u16 {
        match self {
            BaseType::Long | BaseType::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed field type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeDesc {
    /// A primitive type.
    Base(BaseType),
    /// A class or interface, by internal binary name (`java/lang/Object`).
    Object(String),
    /// An array of the inner type.
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Parses a complete field descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Descriptor`] if the string is not exactly one field descriptor.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use classflow::bytecode::{BaseType, TypeDesc};
    ///
    /// let ty = TypeDesc::parse("[[I")?;
    /// assert_eq!(ty.dimensions(), 2);
    /// assert_eq!(ty.element(), &TypeDesc::Base(BaseType::Int));
    /// # Ok::<(), classflow::Error>(())
    /// ```
    pub fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let desc = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(desc),
            Some(c) => Err(Error::Descriptor(format!(
                "unexpected leftover input '{c}' in {source}"
            ))),
        }
    }

    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let mut dims = 0usize;
        while source.peek() == Some(&'[') {
            source.next();
            dims += 1;
        }

        let mut desc = match source.next() {
            Some('L') => {
                let mut name = String::new();
                loop {
                    match source.next() {
                        Some(';') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::Descriptor(format!(
                                "unterminated class name '{name}'"
                            )))
                        }
                    }
                }
                if name.is_empty() {
                    return Err(Error::Descriptor("empty class name".to_string()));
                }
                TypeDesc::Object(name)
            }
            Some(c) => match BaseType::from_descriptor_char(c) {
                Some(base) => TypeDesc::Base(base),
                None => {
                    return Err(Error::Descriptor(format!(
                        "invalid type character '{c}'"
                    )))
                }
            },
            None => return Err(Error::Descriptor("missing field type".to_string())),
        };

        for _ in 0..dims {
            desc = TypeDesc::Array(Box::new(desc));
        }
        Ok(desc)
    }

    /// Shorthand for a class type.
    pub fn object(name: impl Into<String>) -> Self {
        TypeDesc::Object(name.into())
    }

    /// Number of array dimensions, 0 for non-arrays.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        let mut dims = 0;
        let mut current = self;
        while let TypeDesc::Array(inner) = current {
            dims += 1;
            current = inner;
        }
        dims
    }

    /// The innermost non-array type.
    #[must_use]
    pub fn element(&self) -> &TypeDesc {
        let mut current = self;
        while let TypeDesc::Array(inner) = current {
            current = inner;
        }
        current
    }

    /// Returns `true` for class and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        !matches!(self, TypeDesc::Base(_))
    }

    /// Number of local variable slots a value of this type occupies.
    #[must_use]
    pub fn width(&self) -> u16 {
        match self {
            TypeDesc::Base(base) => base.width(),
            _ => 1,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Base(base) => write!(f, "{}", base.descriptor_char()),
            TypeDesc::Object(name) => write!(f, "L{name};"),
            TypeDesc::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// A parsed method descriptor: parameter types and an optional return type
/// (`None` for `void`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order, excluding `this`.
    pub params: Vec<TypeDesc>,
    /// Return type, `None` for `V`.
    pub ret: Option<TypeDesc>,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(I[Ljava/lang/String;)V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Descriptor`] on malformed input.
    pub fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        if chars.next() != Some('(') {
            return Err(Error::Descriptor(format!(
                "method descriptor must start with '(': {source}"
            )));
        }

        let mut params = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => params.push(TypeDesc::parse_from(&mut chars)?),
                None => {
                    return Err(Error::Descriptor(format!(
                        "unterminated parameter list: {source}"
                    )))
                }
            }
        }

        let ret = if chars.peek() == Some(&'V') {
            chars.next();
            None
        } else {
            Some(TypeDesc::parse_from(&mut chars)?)
        };

        match chars.next() {
            None => Ok(MethodDescriptor { params, ret }),
            Some(c) => Err(Error::Descriptor(format!(
                "unexpected leftover input '{c}' in {source}"
            ))),
        }
    }

    /// Total local variable slots taken by the parameters, excluding `this`.
    #[must_use]
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(TypeDesc::width).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        match &self.ret {
            Some(ret) => write!(f, "){ret}"),
            None => write!(f, ")V"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_descriptors() {
        assert_eq!(TypeDesc::parse("J").unwrap(), TypeDesc::Base(BaseType::Long));
        assert_eq!(
            TypeDesc::parse("Ljava/lang/String;").unwrap(),
            TypeDesc::object("java/lang/String")
        );

        let arr = TypeDesc::parse("[[Ljava/lang/Object;").unwrap();
        assert_eq!(arr.dimensions(), 2);
        assert_eq!(arr.element(), &TypeDesc::object("java/lang/Object"));
        assert_eq!(arr.to_string(), "[[Ljava/lang/Object;");
    }

    #[test]
    fn test_parse_method_descriptor() {
        let desc = MethodDescriptor::parse("(IJ[Ljava/lang/String;D)V").unwrap();
        assert_eq!(desc.params.len(), 4);
        assert_eq!(desc.param_slots(), 6);
        assert_eq!(desc.ret, None);
        assert_eq!(desc.to_string(), "(IJ[Ljava/lang/String;D)V");

        let desc = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(desc.params.is_empty());
        assert_eq!(desc.ret, Some(TypeDesc::object("java/lang/Object")));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TypeDesc::parse("Ljava/lang/String").is_err());
        assert!(TypeDesc::parse("II").is_err());
        assert!(TypeDesc::parse("Q").is_err());
        assert!(TypeDesc::parse("L;").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(I)VV").is_err());
    }
}
