pub mod blobs;
pub mod health;
pub mod notify;
