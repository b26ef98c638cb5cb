//! Batch metadata publication to content-addressed storage

pub mod canonical;
pub mod model;
pub mod service;
pub mod store;

pub use model::{BatchDraft, BatchProperties, MetadataDocument, PackagingClass, PublishedMetadata};
pub use service::MetadataPublisher;
pub use store::{HttpMetadataStore, InMemoryMetadataStore, MetadataStore, StoreError};
