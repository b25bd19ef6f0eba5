//! In-memory bucket for tests and single-node development

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Bucket, BucketError, ByteStream, ListPage, ObjectAttributes, Result, DELIMITER};

#[derive(Debug, Clone)]
struct Object {
    data: Bytes,
    content_type: Option<String>,
    mod_time: DateTime<Utc>,
}

impl Object {
    fn attributes(&self, key: &str) -> ObjectAttributes {
        ObjectAttributes {
            key: key.to_string(),
            size: self.data.len() as i64,
            mod_time: Some(self.mod_time),
            content_type: self.content_type.clone(),
            is_dir: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBucket {
    objects: Arc<RwLock<BTreeMap<String, Object>>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit modification time.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>, mod_time: DateTime<Utc>) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.into(),
                Object {
                    data: data.into(),
                    content_type: None,
                    mod_time,
                },
            );
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn get(&self, key: &str) -> Result<Object> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| BucketError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn reader(&self, key: &str) -> Result<(ObjectAttributes, ByteStream)> {
        let object = self.get(key)?;
        let attrs = object.attributes(key);
        Ok((attrs, stream::once(async move { Ok(object.data) }).boxed()))
    }

    async fn write_stream(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: Option<&str>,
    ) -> Result<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let written = buf.len() as u64;
        self.write_all(key, buf.freeze(), content_type).await?;
        Ok(written)
    }

    async fn write_all(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Object {
                    data,
                    content_type: content_type.map(str::to_string),
                    mod_time: Utc::now(),
                },
            );
        Ok(())
    }

    async fn read_all(&self, key: &str) -> Result<Bytes> {
        Ok(self.get(key)?.data)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key))
    }

    async fn attributes(&self, key: &str) -> Result<ObjectAttributes> {
        Ok(self.get(key)?.attributes(key))
    }

    async fn list_page(&self, token: Option<&str>, limit: usize) -> Result<ListPage> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);

        let mut entries: Vec<ObjectAttributes> = Vec::new();
        for (key, object) in objects.iter() {
            match key.find(DELIMITER) {
                Some(idx) => {
                    let dir = &key[..idx + DELIMITER.len()];
                    if entries.last().map(|e| e.key.as_str()) != Some(dir) {
                        entries.push(ObjectAttributes {
                            key: dir.to_string(),
                            is_dir: true,
                            ..Default::default()
                        });
                    }
                },
                None => entries.push(object.attributes(key)),
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries.dedup_by(|a, b| a.key == b.key);

        let start = match token {
            None => 0,
            Some(token) => entries
                .iter()
                .position(|e| e.key.as_str() > token)
                .unwrap_or(entries.len()),
        };
        let limit = limit.max(1);
        let page: Vec<_> = entries.iter().skip(start).take(limit).cloned().collect();
        let next_token = match page.last() {
            Some(last) if start + page.len() < entries.len() => Some(last.key.clone()),
            _ => None,
        };

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
