//! Server roles
//!
//! The three cluster processes:
//! - login: hands worlds out to world coordinators
//! - world: coordinates one world and its channel workers
//! - channel: registers with a world coordinator

pub mod channel;
pub mod login;
pub mod world;
