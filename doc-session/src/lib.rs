pub mod context;
pub mod error;
pub mod postgres;
pub mod storage;

// Re-export commonly used types
pub use context::Context;
pub use error::{Result, SessionError};
pub use postgres::PostgresSessionStorage;
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
