pub mod index;
pub mod repository;
pub mod resolver;
pub mod version;

pub use repository::{HttpIndexSource, IndexSource};
pub use resolver::{Resolution, VersionResolver};
pub use version::UnparsableVersionPolicy;
