pub mod filter;
pub mod memory;
pub mod paranoid;
pub mod postgres;
pub mod repository;
pub mod store;

pub use filter::{Filter, Update, Value};
pub use memory::MemoryStore;
pub use paranoid::QueryOptions;
pub use postgres::PgStore;
pub use repository::{Entity, Hydrated, Page, PageRequest, Repository, UpdateOptions};
pub use store::{Collection, DocumentStore, StoreError};
