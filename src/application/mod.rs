pub mod accounts;
pub mod authoring;
pub mod error;
pub mod feed;
pub mod follows;
pub mod pagination;
pub mod repos;
