pub mod attendance;
pub mod backup;
pub mod billing;
pub mod core;
pub mod directory;
pub mod reports;
pub mod setup;
