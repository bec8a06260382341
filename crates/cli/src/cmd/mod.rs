//! CLI command implementations

pub mod cp;
pub mod day;
pub mod init;
pub mod log;
pub mod restore;
pub mod status;
