use crate::fold::FoldId;
use crate::native::EngineAddr;
use thiserror::Error;

/// Faults detected by the bridge.
///
/// Every variant is a programming error on one side of the boundary. They are
/// returned as values internally so they can be inspected, but the host facade
/// and the native callback hooks never swallow them: see [`fatal`].
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unlock called without lock being held")]
    UnbalancedUnlock,

    #[error("cannot report changes on zero-sized fields")]
    ZeroSizedField,

    #[error("provided field is not a member of the given value")]
    FieldOutsideValue,

    #[error("cannot hand an unhashable struct value{} to native logic; use its address instead", type_suffix(.type_name))]
    UnhashableValue { type_name: String },

    #[error("cannot hand pointer of pointer to native logic; use a simple pointer instead")]
    PointerToPointer,

    #[error("cannot access unaddressable and unhashable struct value on field {type_name}.{field}")]
    UnaddressableField { type_name: String, field: String },

    #[error("cannot allocate new objects while painting")]
    AllocWhilePainting,

    #[error("paint callback entered while another paint is in progress")]
    NestedPaint,

    #[error("unknown engine pointer {0}; who created the engine?")]
    UnknownEngine(EngineAddr),

    #[error("accessing value without an engine pointer; who created the value?")]
    MissingEnginePointer,

    #[error("value had no engine, but was not created by a registered type; who created the value?")]
    NotPending,

    #[error("destroying value without an associated engine; who created the value?")]
    DestroyedWithoutEngine,

    #[error("engine {0} was released from global list while its values were still alive")]
    EngineReleased(EngineAddr),

    #[error("destroying value that knows about the engine, but the engine doesn't know about the value; who cleared the engine?")]
    EngineForgotValue,

    #[error("unknown value fold {0}")]
    UnknownFold(FoldId),

    #[error("type {type_name} has no field with index {index}")]
    UnknownField { type_name: String, index: usize },

    #[error("type {type_name} has no method with index {index}")]
    UnknownMethod { type_name: String, index: usize },

    #[error("property of {type_name} has neither a field nor a getter")]
    NoAccessor { type_name: String },

    #[error("no registered type with index {0}")]
    UnknownType(u32),

    #[error("field {type_name}.{field} is not a list of objects")]
    NotObjectList { type_name: String, field: String },

    #[error("list index {index} out of range for length {len}")]
    ListIndex { index: usize, len: usize },

    #[error("method {method} has too many parameters ({count} > {max})")]
    TooManyParams { method: String, count: usize, max: usize },

    #[error("function has too many results")]
    TooManyResults,

    #[error("method {method} did not return a value")]
    NoResult { method: String },

    #[error("unsupported data type: {0}")]
    UnsupportedDataType(&'static str),

    #[error("value of type {actual} is not a {expected}")]
    TypeMismatch { expected: String, actual: String },

    #[error("bridge operation must run on the event-loop thread")]
    NotOnLoopThread,

    #[error("event-loop thread is already bound")]
    LoopAlreadyBound,

    #[error("event loop is gone")]
    LoopGone,

    #[error("cannot use {from} as a {to}")]
    CannotUse { from: String, to: String },

    #[error("cannot convert parameter {index} of method {method} from {from} to {to} (got {got})")]
    ParamConversion {
        method: String,
        index: usize,
        from: String,
        to: String,
        got: String,
    },

    #[error("native runtime failure: {0}")]
    Native(String),
}

impl BridgeError {
    /// Whether this is a data-conversion mismatch rather than a bookkeeping fault.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            BridgeError::CannotUse { .. } | BridgeError::ParamConversion { .. }
        )
    }
}

fn type_suffix(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" ({name})")
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Abort on a consistency fault.
///
/// Continuing after one of these would corrupt the cross-runtime bookkeeping,
/// so the error is logged and raised as a panic on the current thread.
#[track_caller]
pub fn fatal(err: BridgeError) -> ! {
    if err.is_conversion() {
        tracing::error!(error = %err, "bridge conversion failure");
    } else {
        tracing::error!(error = %err, "bridge consistency fault");
    }
    panic!("{err}")
}

/// Unwrap a bridge result or abort.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for BridgeResult<T> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhashable_message_names_type() {
        let err = BridgeError::UnhashableValue {
            type_name: "Point".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot hand an unhashable struct value (Point) to native logic; use its address instead"
        );
        let anonymous = BridgeError::UnhashableValue {
            type_name: String::new(),
        };
        assert!(anonymous.to_string().starts_with("cannot hand an unhashable struct value to"));
    }

    #[test]
    fn conversion_errors_are_distinguished() {
        let err = BridgeError::CannotUse {
            from: "string".into(),
            to: "int".into(),
        };
        assert!(err.is_conversion());
        assert!(!BridgeError::UnbalancedUnlock.is_conversion());
        assert_eq!(err.to_string(), "cannot use string as a int");
    }

    #[test]
    #[should_panic(expected = "unlock called without lock being held")]
    fn fatal_panics_with_message() {
        fatal(BridgeError::UnbalancedUnlock);
    }
}
