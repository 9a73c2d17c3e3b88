pub mod timing;

pub use timing::Timer;
