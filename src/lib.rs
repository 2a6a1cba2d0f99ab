// Library surface for the binary and for headless tests.
pub mod app_dirs;
pub mod cdp;
pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod observer;
pub mod round;
pub mod supervisor;
pub mod surface;
pub mod timing;
