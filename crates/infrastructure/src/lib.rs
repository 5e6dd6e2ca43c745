pub mod pg_gateway;

pub use pg_gateway::{create_pg_pool, PgPersistenceGateway};
