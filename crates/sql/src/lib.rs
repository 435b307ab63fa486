//! `sagastore-sql`: dialect adapters and script generation.
//!
//! The saga statements are built as a small operation tree ([`ast`]) and
//! rendered per backend by [`render`], so the generator never templates SQL
//! strings by dialect.

pub mod ast;
pub mod dialect;
pub mod publish;
pub mod render;
pub mod script;
pub mod value;

pub use ast::{Column, Operation, Predicate, TableSpec};
pub use dialect::{Dialect, SqlDialect};
pub use publish::{ArtifactKey, BundleError, PublishedFile, ScriptBundle, ScriptKind, dedupe_published};
pub use render::Statement;
pub use script::{PreparedStatement, SagaScripts, SagaStatements, ScriptGenerator};
pub use value::{SqlType, SqlValue};
