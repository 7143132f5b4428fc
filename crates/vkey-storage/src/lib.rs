//! vkey-storage: remote recovery blob store over OpenDAL

pub mod blob;
pub mod connector;
pub mod health;
pub mod operator;
pub mod store;

pub use blob::BlobStoreClient;
pub use connector::RemoteConnector;
pub use health::check_health;
pub use operator::{build_gdrive_operator, build_memory_operator};
pub use store::{FileId, RecoveryStore};
