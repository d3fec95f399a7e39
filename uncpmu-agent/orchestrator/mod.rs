pub mod poller;

pub use poller::UncorePoller;
