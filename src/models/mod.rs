pub mod user;

pub use user::{User, UserPage, UserQuery};
