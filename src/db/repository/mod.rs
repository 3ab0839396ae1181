pub mod blob;
pub mod credentials;
pub mod picture;

pub use blob::BlobRepository;
pub use credentials::CredentialsRepository;
pub use picture::PictureRepository;
