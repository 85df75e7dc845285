//! Core abstractions for the migration engine.
//!
//! - [`schema`]: table, key and foreign key metadata types
//! - [`identifier`]: identifier validation and T-SQL quoting
//! - [`traits`]: collaborator traits (metadata, statement execution, bulk copy)
//!
//! The resolver, planner, scheduler and constraint lifecycle only ever see
//! these types and traits, so every one of them can be exercised against
//! in-memory fakes.

pub mod identifier;
pub mod schema;
pub mod traits;

pub use schema::{
    DependencyEdge, FkAction, ForeignKeyConstraint, KeyColumnInfo, KeyRange, KeyType, RangeValue,
    TableDescriptor, TableId, TableSize,
};
pub use traits::{MetadataProvider, SqlExecutor, TransferExecutor};
