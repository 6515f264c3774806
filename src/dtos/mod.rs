pub mod courier;
pub mod handover;
pub mod manifest;
pub mod order;
pub mod projection;
pub mod rider;
pub mod settlement;
