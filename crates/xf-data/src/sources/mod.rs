pub mod csv_loader;
pub mod sqlite_engine;

pub use csv_loader::{load_csv, load_csv_reader};
pub use sqlite_engine::SqliteEngine;
