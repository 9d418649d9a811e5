pub mod booking;
pub mod conversation;
pub mod message;
pub mod offering;
pub mod outbound;
pub mod tenant;
