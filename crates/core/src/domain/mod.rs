pub mod context;
pub mod event;
pub mod session;
