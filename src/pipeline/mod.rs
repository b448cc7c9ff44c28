pub mod adapters;
pub mod discovery;
pub mod filing;
pub mod matcher;
pub mod processor; // discover → extract → match → upload → file → ledger
pub mod traits;

pub use adapters::*;
pub use discovery::*;
pub use filing::*;
pub use matcher::*;
pub use processor::*;
pub use traits::*;
