//! Database models, one file per table.

pub mod blob;
pub mod credentials;
pub mod picture;

pub use self::blob::*;
pub use self::credentials::*;
pub use self::picture::*;
