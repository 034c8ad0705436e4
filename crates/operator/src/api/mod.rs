//! API schema definitions for the operator's custom resources.

pub mod v1;
