pub mod datastore;
pub mod files;
pub mod image;
pub mod postgres;
pub mod tables;

pub use datastore::{Datastore, Row, TxHandle};
pub use postgres::PgDatastore;
