mod connector;

pub use connector::{AcquireError, DbHandle, MysqlConnector, ReleaseDiscipline};
