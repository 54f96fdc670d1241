//! Application services: repository seams, error mapping and the catalog facade.

pub mod catalog;
pub mod error;
pub mod repos;
pub mod similarity;
