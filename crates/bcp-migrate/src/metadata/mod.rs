//! Database adapters implementing the catalog and statement traits.

mod mssql;

pub use mssql::MssqlDatabase;
