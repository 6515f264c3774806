pub mod courier;
pub mod handover;
pub mod manifest;
pub mod order;
pub mod rider;
