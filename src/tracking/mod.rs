pub mod channel;
pub mod coordinator;
pub mod failover;
pub mod feed;
pub mod fleet;
pub mod poll;
pub mod push;
