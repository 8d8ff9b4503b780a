use crate::blob::traits::{BlobStore, PutMode};
use crate::blob::{validate_path, validate_prefix};
use crate::config::S3Config;
use crate::models::TenantId;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

/// S3-compatible blob store. Objects live at `{prefix}/tenant/{tenant}/{path}`.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3BlobStore {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn new(cfg: &S3Config) -> Result<Self> {
        let creds = Credentials::new(
            cfg.access_key_id.clone(),
            cfg.secret_access_key.clone(),
            None,
            None,
            "unlock_static",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(creds);

        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if cfg.endpoint.is_some() {
            // MinIO and friends expect path-style addressing.
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
        })
    }

    fn tenant_root(&self, tenant_id: TenantId) -> String {
        let mut out = String::new();
        if let Some(p) = &self.prefix {
            if !p.trim().is_empty() {
                out.push_str(p.trim().trim_matches('/'));
                out.push('/');
            }
        }
        out.push_str("tenant/");
        out.push_str(&tenant_id.to_string());
        out.push('/');
        out
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn object_key(&self, tenant_id: TenantId, path: &str) -> Result<String> {
        validate_path(path)?;
        Ok(format!("{}{path}", self.tenant_root(tenant_id)))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn put(&self, tenant_id: TenantId, path: &str, data: Bytes, mode: PutMode) -> Result<()> {
        let object_key = self.object_key(tenant_id, path)?;
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type("application/json")
            .body(ByteStream::from(data));
        if mode == PutMode::Create {
            req = req.if_none_match("*");
        }

        match req.send().await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("PreconditionFailed") => {
                Err(Error::Conflict(format!("blob already exists: {path}")))
            }
            Err(e) => Err(Error::backend("s3 put_object", e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, tenant_id: TenantId, path: &str) -> Result<Option<Bytes>> {
        let object_key = self.object_key(tenant_id, path)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(Error::backend("s3 get_object", e));
            }
        };

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::backend("s3 collect body", e))?
            .into_bytes();
        Ok(Some(data))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn exists(&self, tenant_id: TenantId, path: &str) -> Result<bool> {
        let object_key = self.object_key(tenant_id, path)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(Error::backend("s3 head_object", e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, tenant_id: TenantId, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let root = self.tenant_root(tenant_id);
        let scoped_prefix = format!("{root}{prefix}");

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&scoped_prefix);
            if let Some(t) = token.take() {
                req = req.continuation_token(t);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| Error::backend("s3 list_objects_v2", e))?;

            for obj in resp.contents.unwrap_or_default() {
                if let Some(k) = obj.key {
                    if let Some(rel) = k.strip_prefix(&root) {
                        keys.push(rel.to_string());
                    }
                }
            }

            if resp.is_truncated.unwrap_or(false) {
                token = resp.next_continuation_token;
                if token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }
}
