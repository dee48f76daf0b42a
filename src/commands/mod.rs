pub mod inspect;
pub mod serve;

// Re-export command functions for convenience
pub use inspect::inspect;
pub use serve::{coordinator_server, ServeParams};
