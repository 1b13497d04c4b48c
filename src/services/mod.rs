pub mod availability;
pub mod booking;
pub mod cleanup;
pub mod lock;
pub mod notification;
pub mod refund;
