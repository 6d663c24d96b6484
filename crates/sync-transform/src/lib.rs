//! Column transform pipeline for mesh-sync.
//!
//! A transform maps one source-table change event into zero, one, or
//! many target-table change events by evaluating a per-column function
//! for each declared [`TransformColumn`]. Primary-key transform columns
//! are evaluated first and may fan a single source row out into multiple
//! target rows (cartesian expansion over multi-valued key candidates).
//!
//! The stage is side-effect-free with respect to the database: every
//! built-in function is a pure function of the input row and its
//! configuration. The one deliberate escape hatch is the script
//! transform, which delegates to an injected [`ScriptEngine`] capability
//! so that scripting stays swappable (and fake-able in tests) rather
//! than hard-wired.
//!
//! Transform functions are resolved through a [`TransformRegistry`]
//! constructed at startup and passed by reference into the pipeline;
//! there is no global function table.

pub mod config;
pub mod functions;
pub mod pipeline;

pub use config::{DeleteAction, TransformColumn, TransformPoint, TransformTable};
pub use functions::{ScriptEngine, TransformContext, TransformFunction, TransformRegistry};
pub use pipeline::{TransformOutput, TransformPipeline};

use sync_model::event::Cell;
use thiserror::Error;

/// The value(s) a transform function produced for one target column.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformedValue {
    /// The common case: one value (possibly NULL).
    Single(Cell),
    /// Multiple candidate values; on a primary-key column each candidate
    /// beyond the first clones the in-progress target row.
    Multiple(Vec<Cell>),
}

/// Outcome signals from a transform function.
///
/// `IgnoreColumn` and `IgnoreRow` are decisions, not faults: the
/// pipeline pattern-matches on them to skip a column or abort a target
/// row. Only `Failed` is a genuine error.
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    /// Leave this target column out of the row.
    #[error("transform elected to ignore the column")]
    IgnoreColumn,

    /// Drop the whole target row for this event.
    #[error("transform elected to ignore the row")]
    IgnoreRow,

    /// The function could not be evaluated.
    #[error("transform '{transform}' failed: {reason}")]
    Failed { transform: String, reason: String },

    /// The configuration names a function the registry does not know.
    #[error("no transform function registered under '{0}'")]
    UnknownFunction(String),
}
