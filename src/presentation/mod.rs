pub mod gateway;
pub mod messages;

pub use gateway::Gateway;
