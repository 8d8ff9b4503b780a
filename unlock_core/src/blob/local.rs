use crate::blob::traits::{BlobStore, PutMode};
use crate::blob::{validate_path, validate_prefix};
use crate::models::TenantId;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Filesystem blob store rooted at `root/{tenant}/`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    #[tracing::instrument(level = "debug")]
    pub async fn new(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::backend("create blob root", e))?;
        Ok(Self { root })
    }

    fn tenant_root(&self, tenant_id: TenantId) -> PathBuf {
        self.root.join(tenant_id.to_string())
    }

    fn path_for(&self, tenant_id: TenantId, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.tenant_root(tenant_id).join(path))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn put(&self, tenant_id: TenantId, path: &str, data: Bytes, mode: PutMode) -> Result<()> {
        let file_path = self.path_for(tenant_id, path)?;
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("create blob dir", e))?;
        }

        match mode {
            PutMode::Overwrite => tokio::fs::write(&file_path, &data)
                .await
                .map_err(|e| Error::backend("blob write", e)),
            PutMode::Create => {
                let mut file = match tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&file_path)
                    .await
                {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        return Err(Error::Conflict(format!("blob already exists: {path}")));
                    }
                    Err(e) => return Err(Error::backend("blob create", e)),
                };
                file.write_all(&data)
                    .await
                    .map_err(|e| Error::backend("blob write", e))?;
                file.flush()
                    .await
                    .map_err(|e| Error::backend("blob flush", e))
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, tenant_id: TenantId, path: &str) -> Result<Option<Bytes>> {
        let file_path = self.path_for(tenant_id, path)?;
        match tokio::fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::backend("blob read", e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn exists(&self, tenant_id: TenantId, path: &str) -> Result<bool> {
        let file_path = self.path_for(tenant_id, path)?;
        match tokio::fs::metadata(&file_path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::backend("blob metadata", e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, tenant_id: TenantId, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let base = self.tenant_root(tenant_id);
        let mut out = Vec::new();
        if tokio::fs::metadata(&base).await.is_err() {
            return Ok(out);
        }

        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut rd = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::backend("blob read_dir", e))?;
            while let Some(ent) = rd
                .next_entry()
                .await
                .map_err(|e| Error::backend("blob next_entry", e))?
            {
                let path = ent.path();
                let meta = ent
                    .metadata()
                    .await
                    .map_err(|e| Error::backend("blob metadata", e))?;
                if meta.is_dir() {
                    stack.push(path);
                } else if meta.is_file() {
                    if let Ok(rel) = path.strip_prefix(&base) {
                        let rel = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if rel.starts_with(prefix) {
                            out.push(rel);
                        }
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
