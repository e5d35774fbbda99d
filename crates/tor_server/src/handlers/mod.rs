pub mod health;
pub mod tor;
pub mod workflow;
