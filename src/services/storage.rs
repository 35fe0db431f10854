use crate::entities::{media_library, prelude::*};
use async_recursion::async_recursion;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Maximum length of the sanitized base inside a generated filename.
const MAX_BASE_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("source file unavailable: {0}")]
    SourceUnavailable(PathBuf),

    #[error("duplicate failed for categories {failed:?}")]
    PartialDuplicate {
        /// Copies that did land; they are left in place.
        completed: HashMap<Category, PathBuf>,
        failed: Vec<(Category, String)>,
    },

    #[error("invalid tenant slug: {0}")]
    InvalidTenant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Category directories of a tenant's media tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Originals,
    Media,
    MediaThumbs,
    Public,
    PublicBlurred,
    Rejected,
    Temp,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Originals,
        Category::Media,
        Category::MediaThumbs,
        Category::Public,
        Category::PublicBlurred,
        Category::Rejected,
        Category::Temp,
    ];

    pub fn rel_path(&self) -> &'static str {
        match self {
            Category::Originals => "originals",
            Category::Media => "media",
            Category::MediaThumbs => "media/thumbs",
            Category::Public => "public",
            Category::PublicBlurred => "public/blurred",
            Category::Rejected => "rejected",
            Category::Temp => "temp",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct ReclaimReport {
    pub scanned: u64,
    pub deleted: u64,
    pub kept_recent: u64,
}

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct TenantStats {
    pub total_bytes: u64,
    pub total_files: u64,
}

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct StorageStatistics {
    pub total_bytes: u64,
    pub total_files: u64,
    pub per_tenant: HashMap<String, TenantStats>,
}

/// Owns the tenant-scoped directory trees. No other component touches the
/// filesystem directly.
pub struct StorageManager {
    root: PathBuf,
    max_age: Duration,
}

impl StorageManager {
    pub fn new(root: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            root: root.into(),
            max_age,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf, StorageError> {
        if tenant.is_empty()
            || !tenant
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StorageError::InvalidTenant(tenant.to_string()));
        }
        Ok(self.root.join(tenant))
    }

    pub fn category_dir(&self, tenant: &str, category: Category) -> Result<PathBuf, StorageError> {
        Ok(self.tenant_dir(tenant)?.join(category.rel_path()))
    }

    /// Idempotently creates every category directory for a tenant. Never
    /// destructive.
    pub async fn ensure_tenant_layout(&self, tenant: &str) -> Result<Vec<PathBuf>, StorageError> {
        let mut created = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let dir = self.category_dir(tenant, category)?;
            tokio::fs::create_dir_all(&dir).await?;
            created.push(dir);
        }
        Ok(created)
    }

    /// Generates `<prefix_>timestamp_randomhex_sanitizedbase.ext`. Only
    /// `[A-Za-z0-9_-]` survives in the base, which is truncated to bound the
    /// final filename length; the random component makes collisions for the
    /// same original practically impossible.
    pub fn secure_filename(original: &str, prefix: Option<&str>) -> String {
        let path = Path::new(original);
        let base = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("upload");
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();

        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };

        let mut base = sanitize(base);
        base.truncate(MAX_BASE_LEN);
        if base.is_empty() {
            base.push_str("upload");
        }
        let ext = sanitize(&ext);

        let mut random = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut random);

        let stem = format!(
            "{}_{}_{}",
            Utc::now().timestamp(),
            hex::encode(random),
            base
        );

        match prefix {
            Some(p) if !p.is_empty() => format!("{}_{}.{}", sanitize(p), stem, ext),
            _ => format!("{}.{}", stem, ext),
        }
    }

    /// Writes upload bytes into the tenant's `temp` directory under a fresh
    /// secure filename. First stop of every accepted upload.
    pub async fn stage_temp(
        &self,
        tenant: &str,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        self.ensure_tenant_layout(tenant).await?;
        let filename = Self::secure_filename(original_filename, None);
        let path = self.category_dir(tenant, Category::Temp)?.join(&filename);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            // Do not leave a half-written temp file behind.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        Ok(path)
    }

    /// Atomically moves a staged file into a category via same-volume rename.
    pub async fn relocate(
        &self,
        src: &Path,
        tenant: &str,
        filename: &str,
        category: Category,
    ) -> Result<PathBuf, StorageError> {
        match tokio::fs::metadata(src).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::SourceUnavailable(src.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }

        let dir = self.category_dir(tenant, category)?;
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(filename);
        tokio::fs::rename(src, &dest).await?;
        Ok(dest)
    }

    /// Copies a file into several categories at once (e.g. original +
    /// published copy). Partial failure leaves completed copies in place and
    /// reports which categories failed.
    pub async fn duplicate_across(
        &self,
        src: &Path,
        tenant: &str,
        filename: &str,
        categories: &[Category],
    ) -> Result<HashMap<Category, PathBuf>, StorageError> {
        match tokio::fs::metadata(src).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::SourceUnavailable(src.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }

        let mut completed = HashMap::new();
        let mut failed = Vec::new();

        for &category in categories {
            let result: Result<PathBuf, StorageError> = async {
                let dir = self.category_dir(tenant, category)?;
                tokio::fs::create_dir_all(&dir).await?;
                let dest = dir.join(filename);
                tokio::fs::copy(src, &dest).await?;
                Ok(dest)
            }
            .await;

            match result {
                Ok(dest) => {
                    completed.insert(category, dest);
                }
                Err(e) => failed.push((category, e.to_string())),
            }
        }

        if failed.is_empty() {
            Ok(completed)
        } else {
            Err(StorageError::PartialDuplicate { completed, failed })
        }
    }

    /// Writes bytes into a category under the given filename (used for
    /// derived artifacts such as blurred copies).
    pub async fn write_category(
        &self,
        tenant: &str,
        filename: &str,
        category: Category,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.category_dir(tenant, category)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Deletes files in every tenant's `temp` directory older than the
    /// configured max-age. Independent of database state.
    pub async fn reclaim_temp(&self) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        let tenants = match self.list_tenants().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Temp reclamation skipped, cannot list tenants: {}", e);
                return report;
            }
        };

        for tenant in tenants {
            let temp_dir = self.root.join(&tenant).join(Category::Temp.rel_path());
            if let Err(e) = self.reclaim_aged_in(&temp_dir, None, &mut report).await {
                tracing::warn!("Temp reclamation failed for tenant {}: {}", tenant, e);
            }
        }

        tracing::info!(
            "Temp reclamation: scanned={} deleted={} kept_recent={}",
            report.scanned,
            report.deleted,
            report.kept_recent
        );
        report
    }

    /// Deletes on-disk files in each tenant's `media` tree that have no live
    /// reference in the store and are older than max-age. The age guard
    /// protects files still mid-upload: anything currently being written is
    /// younger than the threshold by construction. Per-tenant failures are
    /// logged and do not abort the other tenants' scans.
    pub async fn reclaim_orphans(&self, db: &DatabaseConnection) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        let tenants = match self.list_tenants().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Orphan reclamation skipped, cannot list tenants: {}", e);
                return report;
            }
        };

        for tenant in tenants {
            // Consistency snapshot from the store before touching the disk.
            let live_paths: HashSet<String> = match MediaLibrary::find()
                .filter(media_library::Column::TenantId.eq(tenant.clone()))
                .all(db)
                .await
            {
                Ok(rows) => rows.into_iter().map(|m| m.file_path).collect(),
                Err(e) => {
                    tracing::warn!(
                        "Orphan reclamation skipped for tenant {}: store query failed: {}",
                        tenant,
                        e
                    );
                    continue;
                }
            };

            let media_dir = self.root.join(&tenant).join(Category::Media.rel_path());
            if let Err(e) = self
                .reclaim_aged_in(&media_dir, Some(&live_paths), &mut report)
                .await
            {
                tracing::warn!("Orphan reclamation failed for tenant {}: {}", tenant, e);
            }
        }

        tracing::info!(
            "Orphan reclamation: scanned={} deleted={} kept_recent={}",
            report.scanned,
            report.deleted,
            report.kept_recent
        );
        report
    }

    /// Read-only recursive walk of the whole media root. Safe to run
    /// concurrently with writers.
    pub async fn statistics(&self) -> Result<StorageStatistics, StorageError> {
        let mut stats = StorageStatistics::default();

        for tenant in self.list_tenants().await? {
            let mut tenant_stats = TenantStats::default();
            walk_dir(&self.root.join(&tenant), &mut tenant_stats).await?;
            stats.total_bytes += tenant_stats.total_bytes;
            stats.total_files += tenant_stats.total_files;
            stats.per_tenant.insert(tenant, tenant_stats);
        }

        Ok(stats)
    }

    async fn list_tenants(&self) -> Result<Vec<String>, StorageError> {
        let mut tenants = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(tenants),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(name.to_string());
                }
            }
        }
        Ok(tenants)
    }

    /// Deletes aged files under `dir` (recursing into subdirectories). With a
    /// live-path set, files present in the set are never touched.
    #[async_recursion]
    async fn reclaim_aged_in(
        &self,
        dir: &Path,
        live_paths: Option<&'async_recursion HashSet<String>>,
        report: &mut ReclaimReport,
    ) -> Result<(), StorageError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                self.reclaim_aged_in(&path, live_paths, report).await?;
                continue;
            }

            report.scanned += 1;

            if let Some(live) = live_paths {
                if live.contains(&path.to_string_lossy().to_string()) {
                    continue;
                }
            }

            let modified = entry.metadata().await?.modified()?;
            let age = modified.elapsed().unwrap_or(Duration::ZERO);
            if age <= self.max_age {
                report.kept_recent += 1;
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(_) => {
                    report.deleted += 1;
                    tracing::debug!("Reclaimed aged file: {}", path.display());
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }
}

#[async_recursion]
async fn walk_dir(dir: &Path, stats: &mut TenantStats) -> Result<(), StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            walk_dir(&entry.path(), stats).await?;
        } else {
            stats.total_files += 1;
            stats.total_bytes += entry.metadata().await?.len();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manager(root: &Path) -> StorageManager {
        StorageManager::new(root, Duration::from_secs(24 * 3600))
    }

    #[tokio::test]
    async fn test_ensure_tenant_layout_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());

        let first = storage.ensure_tenant_layout("alice").await.unwrap();
        let second = storage.ensure_tenant_layout("alice").await.unwrap();
        assert_eq!(first, second);

        for category in Category::ALL {
            assert!(dir.path().join("alice").join(category.rel_path()).is_dir());
        }
    }

    #[tokio::test]
    async fn test_tenant_slug_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());

        assert!(matches!(
            storage.ensure_tenant_layout("../escape").await,
            Err(StorageError::InvalidTenant(_))
        ));
        assert!(matches!(
            storage.ensure_tenant_layout("").await,
            Err(StorageError::InvalidTenant(_))
        ));
    }

    #[tokio::test]
    async fn test_relocate_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());
        let temp = storage.stage_temp("alice", "photo.jpg", b"data").await.unwrap();

        let dest = storage
            .relocate(&temp, "alice", "photo.jpg", Category::Originals)
            .await
            .unwrap();

        assert!(!temp.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"data");
        assert!(dest.starts_with(dir.path().join("alice/originals")));
    }

    #[tokio::test]
    async fn test_relocate_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());
        storage.ensure_tenant_layout("alice").await.unwrap();

        let missing = dir.path().join("alice/temp/gone.jpg");
        let err = storage
            .relocate(&missing, "alice", "gone.jpg", Category::Originals)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_duplicate_across_categories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());
        let temp = storage.stage_temp("alice", "photo.jpg", b"data").await.unwrap();

        let copies = storage
            .duplicate_across(
                &temp,
                "alice",
                "photo.jpg",
                &[Category::Originals, Category::Public],
            )
            .await
            .unwrap();

        assert_eq!(copies.len(), 2);
        for path in copies.values() {
            assert_eq!(tokio::fs::read(path).await.unwrap(), b"data");
        }
        // Source copy is untouched.
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn test_secure_filename_no_collisions() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let name = StorageManager::secure_filename("nude1.jpg", None);
            assert!(seen.insert(name), "collision in 10k generated filenames");
        }
    }

    #[test]
    fn test_secure_filename_sanitizes() {
        let name = StorageManager::secure_filename("../../etc/pass wd!.JPG", Some("gallery"));
        assert!(name.starts_with("gallery_"));
        assert!(name.ends_with(".jpg"));
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        );

        let long_base = "a".repeat(300);
        let name = StorageManager::secure_filename(&format!("{}.png", long_base), None);
        assert!(name.len() < 100);
    }

    #[tokio::test]
    async fn test_reclaim_temp_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path(), Duration::from_millis(80));
        let temp = storage.stage_temp("alice", "fresh.jpg", b"x").await.unwrap();

        // Younger than max-age: survives.
        let report = storage.reclaim_temp().await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.kept_recent, 1);
        assert!(temp.exists());

        // Older than max-age: deleted.
        tokio::time::sleep(Duration::from_millis(160)).await;
        let report = storage.reclaim_temp().await;
        assert_eq!(report.deleted, 1);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_statistics_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = manager(dir.path());
        storage.stage_temp("alice", "a.jpg", b"12345").await.unwrap();
        storage.stage_temp("bob", "b.jpg", b"123").await.unwrap();

        let stats = storage.statistics().await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_bytes, 8);
        assert_eq!(stats.per_tenant.get("alice").unwrap().total_files, 1);
        assert_eq!(stats.per_tenant.get("bob").unwrap().total_bytes, 3);
    }
}
