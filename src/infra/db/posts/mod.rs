mod query;
mod read;
mod types;
mod write;

pub use query::{CompiledQuery, Fragment, JoinKind, PostQuery, SqlArg, compile};

use super::PostgresRepositories;
