pub mod analytics_worker;
pub mod clickhouse;
pub mod domain;
pub mod nats;

pub use self::analytics_worker::*;
pub use self::clickhouse::*;
pub use self::domain::*;
pub use self::nats::*;
