pub mod contents;
pub mod loader;
pub mod node;
pub mod nsec3;
pub mod slot;
pub mod tree;
pub mod update;

pub use contents::{NameLookup, ZoneContents};
pub use node::{Node, NodeFlags, NodeId};
pub use slot::{Catalog, ZoneSlot};
pub use tree::ZoneTree;
pub use update::Changeset;
