pub mod bridge;
pub mod observer;
