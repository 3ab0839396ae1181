pub mod blobstore;
pub mod init;
pub mod mirror;
pub mod notify;
pub mod palette;
