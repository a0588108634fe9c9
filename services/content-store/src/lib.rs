//! Content Store Service
//!
//! Self-hosted store for image and video blobs carrying arbitrary JSON
//! metadata. Uploads are type-checked by file signature, quota-checked,
//! written to disk, given a JPEG thumbnail and indexed in SQLite, where they
//! can be searched, sorted and paginated.
//!
//! ## Features
//!
//! - **Signature sniffing**: content types come from the bytes, never from
//!   client labels; only `image/*` and `video/*` are accepted
//! - **Quota accounting**: per-file and store-wide limits with reservations
//!   for in-flight writes
//! - **Safe dynamic search**: filters compile to parameterized SQL with a
//!   total ordering for stable pagination
//! - **Previews**: images are downscaled directly, videos via `ffprobe` and
//!   `ffmpeg`
//!
//! ## Architecture
//!
//! ```text
//!  HTTP API (axum)
//!        │
//!        ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Content      │────▶│ Type         │     │ Quota        │
//! │ Store        │     │ Sniffer      │     │ Guard        │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!    │      │                                      │
//!    │      ▼                                      ▼
//!    │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!    │  │ Preview      │──▶│ Media Tool   │   │ Blob Store   │
//!    │  │ Generator    │   │ (ffmpeg)     │   │ blobs/       │
//!    │  └──────────────┘   └──────────────┘   │ previews/    │
//!    ▼                                        └──────────────┘
//! ┌──────────────┐
//! │ Catalog      │
//! │ (SQLite)     │
//! └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod catalog;
pub mod config;
pub mod content_store;
pub mod error;
pub mod media_tool;
pub mod model;
pub mod preview;
pub mod quota;
pub mod search;
pub mod sniffer;

pub use api::{create_router, start_api_server, AppState};
pub use catalog::Catalog;
pub use config::Config;
pub use content_store::ContentStore;
pub use error::{Field, StoreError, StoreResult};
pub use model::{Content, PartialSource, Source, Status, Summary, TagSet};
pub use search::{Filter, Order, Pagination, SortKey};
