pub mod constants;
pub mod config;
pub mod error;
pub mod geodesy;
pub mod timeline;
pub mod motion;
pub mod follow;
pub mod surface;
pub mod prefs;
pub mod input;
pub mod presence;
pub mod net;
pub mod coordinator;
