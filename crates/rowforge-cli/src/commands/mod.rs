//! CLI command implementations

pub mod init;
pub mod lookup;
pub mod preview;
pub mod validate;
