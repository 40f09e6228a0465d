use thiserror::Error;

/// Builds an [`Error::Verification`] for the instruction at `offset`.
macro_rules! verify_error {
    ($offset:expr, $msg:expr) => {
        crate::Error::Verification {
            message: $msg.to_string(),
            offset: $offset,
        }
    };

    ($offset:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::Verification {
            message: format!($fmt, $($arg)*),
            offset: $offset,
        }
    };
}

/// Builds an [`Error::InternalConsistency`] tagged with the source location.
macro_rules! consistency_error {
    ($msg:expr) => {
        crate::Error::InternalConsistency {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InternalConsistency {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every way decompiling a method can fail.
///
/// Failures fall into three groups with different consequences for a caller that
/// processes many methods:
///
/// - [`Error::Verification`] and [`Error::Descriptor`] mean the *input* is bad. The
///   method cannot be decompiled and should be reported and skipped.
/// - [`Error::InternalConsistency`] means a pipeline invariant was violated. This is a
///   bug rather than bad input, and the whole run should be aborted instead of
///   emitting code that may be wrong.
/// - [`Error::Unsupported`] means the method is valid but exceeds a configured limit
///   (for example pathological subroutine nesting).
///
/// No stage produces partial output: a method either yields a complete tree or one
/// of these errors.
///
/// # Examples
///
/// ```rust
/// use classflow::Error;
///
/// fn report(err: &Error) -> &'static str {
///     match err {
///         Error::Verification { .. } | Error::Descriptor(_) => "skip method",
///         Error::Unsupported(_) => "skip method",
///         Error::InternalConsistency { .. } => "abort batch",
///         Error::Builder(_) => "fix the test fixture",
///     }
/// }
/// # let _ = report;
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is malformed or violates the JVM typing rules.
    ///
    /// Raised for bad local indices, stack underflow or overflow, incompatible types at
    /// a merge point, illegal subroutine re-entry, wrong return types, protected
    /// access violations and uninitialized objects escaping a constructor.
    ///
    /// # Fields
    ///
    /// * `message` - What rule was violated
    /// * `offset` - Bytecode address of the offending instruction
    #[error("Verification failed at {offset}: {message}")]
    Verification {
        /// Description of the violated rule
        message: String,
        /// Bytecode address of the offending instruction
        offset: u32,
    },

    /// A pipeline invariant was violated.
    ///
    /// The error records the source location where the violation was detected.
    #[error("Internal consistency - {file}:{line}: {message}")]
    InternalConsistency {
        /// Description of the broken invariant
        message: String,
        /// The source file in which this error occurred
        file: &'static str,
        /// The source line in which this error occurred
        line: u32,
    },

    /// A construct exceeded a configured duplication or iteration limit.
    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    /// A type or method descriptor could not be parsed.
    #[error("Invalid descriptor: {0}")]
    Descriptor(String),

    /// A [`crate::bytecode::CodeBuilder`] was misused.
    #[error("Code builder: {0}")]
    Builder(String),
}

impl Error {
    /// Returns `true` if this error should abort a whole batch rather than only the
    /// current method.
    #[must_use]
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Error::InternalConsistency { .. })
    }

    /// Returns the bytecode address for verification errors.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        match self {
            Error::Verification { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_capture_context() {
        let err = verify_error!(12, "stack underflow");
        assert_eq!(err.offset(), Some(12));
        assert!(!err.is_fatal_for_batch());
        assert_eq!(err.to_string(), "Verification failed at 12: stack underflow");

        let err = consistency_error!("no root for cluster {}", 3);
        assert!(err.is_fatal_for_batch());
        assert!(err.to_string().contains("no root for cluster 3"));
        assert!(err.to_string().contains("error.rs"));
    }
}
