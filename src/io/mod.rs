pub mod activity;
pub mod config_io;
pub mod database;
pub mod debounce;
pub mod events;
pub mod lock;
pub mod store;
pub mod vault_io;
pub mod watcher;
pub mod write_back;
