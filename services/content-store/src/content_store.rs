//! Orchestration of catalog, blob files, quota and previews.
//!
//! Writes run as a short saga: files land first, the catalog row last, and a
//! failure part-way through removes (or restores) the files already touched.
//! Files that cannot be cleaned up are logged as orphans.

use crate::blob_store::BlobStore;
use crate::catalog::{Assignment, Catalog};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::media_tool::FfmpegTool;
use crate::model::{Content, ContentRow, PartialSource, Source, Status, Summary, TagSet};
use crate::preview::PreviewGenerator;
use crate::quota::{QuotaGuard, Reservation};
use crate::search::{Filter, Pagination};
use crate::sniffer::{self, FileType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Async locks keyed by content id, dropped once nobody holds them.
#[derive(Debug, Default)]
struct ContentLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ContentLocks {
    async fn acquire(&self, id: Uuid) -> ContentGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            // Entries left by acquirers cancelled while waiting.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        ContentGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

/// Exclusive access to one content id.
#[derive(Debug)]
struct ContentGuard<'a> {
    locks: &'a ContentLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ContentGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock();
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Previous files of a content item, kept while its blob is replaced.
struct Backup {
    blob: Option<Vec<u8>>,
    preview: Option<Vec<u8>>,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// The content store.
pub struct ContentStore {
    catalog: Catalog,
    blobs: BlobStore,
    previews: BlobStore,
    quota: QuotaGuard,
    generator: PreviewGenerator,
    locks: ContentLocks,
}

impl ContentStore {
    pub fn new(
        catalog: Catalog,
        blobs: BlobStore,
        previews: BlobStore,
        quota: QuotaGuard,
        generator: PreviewGenerator,
    ) -> Self {
        Self {
            catalog,
            blobs,
            previews,
            quota,
            generator,
            locks: ContentLocks::default(),
        }
    }

    /// Open directories and catalog described by `config`.
    pub async fn open(config: &Config) -> StoreResult<Self> {
        let storage = &config.storage;
        let blobs = BlobStore::open(&storage.blobs_path, "primary").await?;
        let previews = BlobStore::open(&storage.previews_path, "preview").await?;

        let catalog = Catalog::connect(&config.database).await?;
        if config.database.run_migrations {
            catalog.run_migrations().await?;
        }

        let quota = QuotaGuard::new(blobs.root(), storage.file_limit, storage.store_limit);
        let tool = FfmpegTool::new(&config.media.ffprobe_path, &config.media.ffmpeg_path);
        let generator = PreviewGenerator::new(storage.preview_height, Arc::new(tool));

        Ok(Self::new(catalog, blobs, previews, quota, generator))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    /// Store new content and return it.
    #[instrument(skip(self, source), fields(name = %source.name, size = source.bytes.len()))]
    pub async fn add(&self, source: Source) -> StoreResult<Content> {
        let id = Uuid::now_v7();
        let kind = sniffer::classify_media(&source.bytes).ok_or(StoreError::UnsupportedMime)?;
        let reservation = self.quota.admit(source.bytes.len() as u64, 0).await?;

        let content = match self.write_new(id, &source, &kind, reservation).await {
            Ok(content) => content,
            Err(e) => {
                self.discard(id).await;
                return Err(e);
            }
        };

        metrics::counter!("store.contents.added").increment(1);
        metrics::counter!("store.bytes.written").increment(content.size);
        info!(%id, mime = %content.mime, "Content added");

        Ok(content)
    }

    async fn write_new(
        &self,
        id: Uuid,
        source: &Source,
        kind: &FileType,
        reservation: Reservation,
    ) -> StoreResult<Content> {
        self.blobs.write(id, &source.bytes).await?;
        // The directory scan counts the blob from here on.
        drop(reservation);

        let preview = self.preview_for(id, &source.bytes, &kind.mime).await?;
        self.previews.write(id, &preview).await?;

        let row = ContentRow {
            content_id: id.to_string(),
            data: source.data.to_string(),
            extension: kind.extension.clone(),
            mime: kind.mime.clone(),
            name: source.name.clone(),
            size: to_i64(source.bytes.len() as u64),
            tags: source.tags.join(),
            time: source.time.timestamp_millis(),
        };
        self.catalog.insert(&row).await?;

        self.assemble(&row, source.bytes.clone())
    }

    async fn preview_for(&self, id: Uuid, bytes: &[u8], mime: &str) -> StoreResult<Vec<u8>> {
        self.generator
            .generate(id, bytes, mime, &self.blobs.path(id))
            .await
            .map_err(|e| {
                warn!(%id, mime, error = %e, "Preview generation failed");
                metrics::counter!("store.previews.failed").increment(1);
                StoreError::from(e)
            })
    }

    /// Remove whatever files a failed add left behind.
    async fn discard(&self, id: Uuid) {
        for store in [&self.blobs, &self.previews] {
            if let Err(e) = store.delete(id).await {
                error!(%id, path = %store.path(id).display(), error = %e, "Orphaned file left behind");
                metrics::counter!("store.orphans.detected").increment(1);
            }
        }
    }

    /// Load content with its primary blob.
    #[instrument(skip(self))]
    pub async fn query(&self, id: Uuid) -> StoreResult<Content> {
        let row = self
            .catalog
            .select_one(id)
            .await?
            .ok_or(StoreError::MissingContent(id))?;

        let bytes = self.blobs.read(id).await?;
        self.assemble(&row, bytes)
    }

    /// Type columns are re-derived from the bytes when they are recognized.
    fn assemble(&self, row: &ContentRow, bytes: Vec<u8>) -> StoreResult<Content> {
        let uuid = row.uuid()?;
        let (extension, mime) = match sniffer::classify(&bytes) {
            Ok(kind) => (kind.extension, kind.mime),
            Err(_) => (row.extension.clone(), row.mime.clone()),
        };

        Ok(Content {
            uuid,
            data: row.data()?,
            extension,
            mime,
            name: row.name.clone(),
            size: row.size(),
            tags: TagSet::from_stored(&row.tags),
            time: row.time()?,
            bytes,
            path: self.blobs.path(uuid),
        })
    }

    pub async fn search(&self, filter: &Filter, pagination: Pagination) -> StoreResult<Vec<Uuid>> {
        self.catalog.search(filter, pagination).await
    }

    pub async fn list(&self, pagination: Pagination) -> StoreResult<Vec<Uuid>> {
        self.catalog.list(pagination).await
    }

    /// Apply the present fields of `partial` and return the refreshed
    /// content.
    #[instrument(skip(self, partial))]
    pub async fn update(&self, id: Uuid, partial: PartialSource) -> StoreResult<Content> {
        let _guard = self.locks.acquire(id).await;

        let row = self
            .catalog
            .select_one(id)
            .await?
            .ok_or(StoreError::MissingContent(id))?;

        let mut assignments = Vec::new();
        let mut backup = None;

        if let Some(bytes) = &partial.bytes {
            let kind = sniffer::classify_media(bytes).ok_or(StoreError::UnsupportedMime)?;
            backup = Some(self.replace_blob(id, bytes, &kind, row.size()).await?);

            assignments.push(Assignment::Extension(kind.extension));
            assignments.push(Assignment::Mime(kind.mime));
            assignments.push(Assignment::Size(to_i64(bytes.len() as u64)));
        }
        if let Some(data) = &partial.data {
            assignments.push(Assignment::Data(data.to_string()));
        }
        if let Some(name) = &partial.name {
            assignments.push(Assignment::Name(name.clone()));
        }
        if let Some(tags) = &partial.tags {
            assignments.push(Assignment::Tags(tags.join()));
        }
        if let Some(time) = partial.time {
            assignments.push(Assignment::Time(time.timestamp_millis()));
        }

        if let Err(e) = self.catalog.update_columns(id, &assignments).await {
            if let Some(backup) = backup {
                self.restore(id, backup).await;
            }
            return Err(e);
        }

        let content = self.query(id).await?;

        metrics::counter!("store.contents.updated").increment(1);
        if partial.bytes.is_some() {
            metrics::counter!("store.bytes.written").increment(content.size);
        }
        info!(%id, columns = assignments.len(), "Content updated");

        Ok(content)
    }

    /// Overwrite blob and preview, restoring the old files on failure.
    async fn replace_blob(
        &self,
        id: Uuid,
        bytes: &[u8],
        kind: &FileType,
        replacing: u64,
    ) -> StoreResult<Backup> {
        let reservation = self.quota.admit(bytes.len() as u64, replacing).await?;

        let backup = Backup {
            blob: self.blobs.read_optional(id).await?,
            preview: self.previews.read_optional(id).await?,
        };

        let written = async {
            self.blobs.write(id, bytes).await?;
            drop(reservation);

            let preview = self.preview_for(id, bytes, &kind.mime).await?;
            self.previews.write(id, &preview).await?;
            Ok::<_, StoreError>(())
        }
        .await;

        match written {
            Ok(()) => Ok(backup),
            Err(e) => {
                self.restore(id, backup).await;
                Err(e)
            }
        }
    }

    async fn restore(&self, id: Uuid, backup: Backup) {
        for (store, previous) in [(&self.blobs, backup.blob), (&self.previews, backup.preview)] {
            let restored = match previous {
                Some(bytes) => store.write(id, &bytes).await,
                None => store.delete(id).await.map(|_| ()),
            };
            if let Err(e) = restored {
                error!(%id, path = %store.path(id).display(), error = %e, "Failed to restore file");
                metrics::counter!("store.orphans.detected").increment(1);
            }
        }
    }

    /// Delete content, returning its last state.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: Uuid) -> StoreResult<Content> {
        let _guard = self.locks.acquire(id).await;

        let row = self
            .catalog
            .select_one(id)
            .await?
            .ok_or(StoreError::MissingContent(id))?;

        let bytes = match self.blobs.read_optional(id).await? {
            Some(bytes) => bytes,
            None => {
                warn!(%id, "Catalog row has no primary blob");
                Vec::new()
            }
        };
        let content = self.assemble(&row, bytes)?;

        self.blobs.delete(id).await?;
        self.previews.delete(id).await?;
        self.catalog.delete(id).await?;

        metrics::counter!("store.contents.removed").increment(1);
        info!(%id, "Content removed");

        Ok(content)
    }

    /// Stored preview bytes.
    pub async fn preview(&self, id: Uuid) -> StoreResult<Vec<u8>> {
        if !self.catalog.exists(id).await? {
            return Err(StoreError::MissingContent(id));
        }
        self.previews
            .read_optional(id)
            .await?
            .ok_or(StoreError::MissingAsset)
    }

    pub async fn info(&self) -> StoreResult<Status> {
        Ok(Status {
            length: self.catalog.count().await?,
            size: self.quota.current_total().await?,
        })
    }

    /// Summary of stored content, read from the catalog alone.
    pub async fn summary(&self, id: Uuid) -> StoreResult<Summary> {
        let row = self
            .catalog
            .select_one(id)
            .await?
            .ok_or(StoreError::MissingContent(id))?;
        Summary::try_from(&row)
    }

    pub fn summarize(&self, content: &Content) -> Summary {
        Summary::from(content)
    }
}
