pub mod booking;
pub mod guest;
pub mod search;
pub mod session;
