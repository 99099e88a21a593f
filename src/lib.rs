pub mod config;
pub mod discord;
pub mod format;
pub mod github;
pub mod model;
pub mod retry;
pub mod supervisor;
pub mod watch;
pub mod watermark;
