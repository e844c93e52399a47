pub mod caps;
pub mod config;
pub mod device;
pub mod latency;
pub mod options;
pub mod pin;
pub mod prefill;
pub mod sim;
pub mod thread;
