pub mod actor;
pub mod assignment;
pub mod courier;
pub mod location;
pub mod order;
