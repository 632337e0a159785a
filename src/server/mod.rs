pub mod dnssec;
pub mod query;
pub mod server;

pub use query::{QueryHandler, Transport};
pub use server::{NameServer, ServerConfig};
