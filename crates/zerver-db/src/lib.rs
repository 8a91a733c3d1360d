pub mod database;
pub mod ddl;
pub mod executor;
pub mod graph;
pub mod history;
pub mod migration;
pub mod operations;
pub mod recorder;
pub mod schema;

pub use ddl::SchemaEditor;
pub use executor::{MigrationExecutor, MigrationStatus, MigrationTarget, PlanStep};
pub use graph::MigrationGraph;
pub use migration::Migration;
pub use operations::Operation;
pub use recorder::MigrationRecorder;
pub use schema::{Column, ColumnDefault, Constraint, Field, FieldType, Index, OnDelete, SchemaState, TableState};
pub use zerver_common::{Dialect, MigrationKey};
