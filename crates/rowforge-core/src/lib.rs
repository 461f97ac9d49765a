//! Rowforge Core Library
//!
//! This crate provides the pure, I/O-free core of Rowforge:
//! - Mapping rule and configuration model with scope tiers
//! - Transform executor (DIRECT / CONCAT / SPLIT / LOOKUP / FORMULA / CUSTOM)
//! - Formula grammar parsing and evaluation
//! - Row validation against target schemas
//! - Row merging and key derivation
//! - Instance lifecycle state machine
//! - Tier-merge resolution of mapping configurations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Resolved   │────▶│  Transform  │────▶│    Row      │
//! │   Rules     │     │  Executor   │     │  Validator  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! Orchestration, caching, and persistence live in `rowforge-engine`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod formula;
pub mod instance;
pub mod resolver;
pub mod row;
pub mod rules;
pub mod schema;
pub mod transform;

pub use error::{Error, Result};
pub use instance::{InstanceStatus, TemplateInstance};
pub use resolver::{MappingValidation, ResolvedMappingConfig, merge_configs, validate_mapping};
pub use row::{Row, RowStatus};
pub use rules::{ConfigScope, MappingConfig, MappingRule, TransformKind};
pub use schema::{FieldType, TargetSchemaField, validate_row};
