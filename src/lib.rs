pub mod dns;
pub mod errors;
pub mod server;
pub mod util;
pub mod zone;

pub use dns::Name;
pub use server::NameServer;
pub use zone::{Catalog, ZoneContents, ZoneSlot};
