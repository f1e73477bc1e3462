pub mod config;
pub mod error;
pub mod http;
pub mod imaging;
pub mod ingest;
pub mod media;
pub mod naming;
pub mod preview;
pub mod remote;
pub mod rollback;
pub mod telemetry;

pub use config::{Config, ServerConfig};
pub use error::{Error, Result};
pub use ingest::{FormFile, Ingestor, MultipartForm, StoredOriginal, UploadRequest};
pub use naming::NameAllocator;
pub use preview::PreviewCache;
