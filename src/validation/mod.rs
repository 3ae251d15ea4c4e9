//! Validation modules for release publishing
//!
//! Pre-publish admission control over every package target in a batch.

pub mod pre_publish;

pub use pre_publish::{
    PrePublishValidator, PreValidationStatus, PreValidationSummary, TargetPreValidation,
};
