pub mod identity;
pub mod user;
pub mod vector_database;

pub use identity::Identity;
pub use user::User;
pub use vector_database::VectorDatabase;
