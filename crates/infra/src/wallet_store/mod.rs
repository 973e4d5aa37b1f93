//! `WalletStore` implementations.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryWalletStore;
pub use postgres::PostgresWalletStore;
