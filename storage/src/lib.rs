pub mod repo;
pub mod wal;

pub use repo::{RepoError, SessionRepository};
