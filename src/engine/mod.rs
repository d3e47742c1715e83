pub mod booking;
pub mod delay;
pub mod pool;
pub mod region;
