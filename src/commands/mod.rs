//! CLI commands implementation

pub mod ask;
pub mod init;
pub mod search;
pub mod seed;
pub mod status;
pub mod validate;

pub use ask::*;
pub use init::*;
pub use search::*;
pub use seed::*;
pub use status::*;
pub use validate::*;
