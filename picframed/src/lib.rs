pub mod catalog;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod media;
pub mod oauth_flow;
pub mod scheduler;
pub mod slideshow;
pub mod storage;
pub mod sync;
