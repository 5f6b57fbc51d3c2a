//! Object channels: where job data is read from or written to

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::protocol::{BulkObject, ByteChannel, SharedChannel};

/// Opens the channel backing an object
#[async_trait]
pub trait ObjectChannelBuilder: Send + Sync {
    async fn build_channel(&self, key: &str) -> Result<Box<dyn ByteChannel>>;
}

/// Reads objects to upload from files under a root directory
#[derive(Debug, Clone)]
pub struct FileObjectPutter {
    root: PathBuf,
}

impl FileObjectPutter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ObjectChannelBuilder for FileObjectPutter {
    async fn build_channel(&self, key: &str) -> Result<Box<dyn ByteChannel>> {
        let file = fs::File::open(self.root.join(key)).await?;
        Ok(Box::new(file))
    }
}

/// Writes downloaded objects to files under a root directory
///
/// Files are not truncated, so ranges land at their object offsets and a
/// resumed job only rewrites what it fetches again.
#[derive(Debug, Clone)]
pub struct FileObjectGetter {
    root: PathBuf,
}

impl FileObjectGetter {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ObjectChannelBuilder for FileObjectGetter {
    async fn build_channel(&self, key: &str) -> Result<Box<dyn ByteChannel>> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        Ok(Box::new(file))
    }
}

struct OpenChannel {
    channel: SharedChannel,
    remaining: usize,
}

/// Channels of a running job, opened on first use and closed after the
/// object's last part
pub(crate) struct JobChannels {
    builder: Arc<dyn ObjectChannelBuilder>,
    parts: HashMap<String, usize>,
    open: Mutex<HashMap<String, OpenChannel>>,
}

impl JobChannels {
    pub(crate) fn new<'a, I>(builder: Arc<dyn ObjectChannelBuilder>, parts: I) -> Self
    where
        I: IntoIterator<Item = &'a BulkObject>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for part in parts {
            *counts.entry(part.name.clone()).or_default() += 1;
        }
        Self {
            builder,
            parts: counts,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn acquire(&self, name: &str) -> Result<SharedChannel> {
        let mut open = self.open.lock().await;
        if let Some(entry) = open.get(name) {
            return Ok(entry.channel.clone());
        }

        debug!("Opening channel for {}", name);
        let channel: SharedChannel = Arc::new(Mutex::new(self.builder.build_channel(name).await?));
        open.insert(
            name.to_string(),
            OpenChannel {
                channel: channel.clone(),
                remaining: self.parts.get(name).copied().unwrap_or(1),
            },
        );
        Ok(channel)
    }

    /// Mark one part of `name` done, closing the channel after the last one
    pub(crate) async fn release(&self, name: &str) -> Result<()> {
        let closed = {
            let mut open = self.open.lock().await;
            let Some(entry) = open.get_mut(name) else {
                return Ok(());
            };
            entry.remaining = entry.remaining.saturating_sub(1);
            if entry.remaining == 0 {
                open.remove(name)
            } else {
                None
            }
        };

        if let Some(entry) = closed {
            debug!("Closing channel for {}", name);
            entry.channel.lock().await.flush().await?;
        }
        Ok(())
    }
}
