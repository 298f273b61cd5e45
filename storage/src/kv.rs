use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;

/// The key/value surface the monitor needs: TTL'd blobs for endpoint
/// metadata plus list operations for the rotation and log queues.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Append `values` to the tail of the list at `key` in one round trip.
    async fn push_back(&self, key: &str, values: Vec<Vec<u8>>) -> anyhow::Result<()>;

    /// Remove and return up to `count` values from the head of the list.
    async fn pop_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>>;

    async fn list_len(&self, key: &str) -> anyhow::Result<u64>;

    /// Read up to `count` values from the head without removing them.
    async fn peek_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>>;

    /// Read the whole list without removing anything.
    async fn list_all(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>>;
}

/// Redis-backed store used in production.
#[derive(Clone)]
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn push_back(&self, key: &str, values: Vec<Vec<u8>>) -> anyhow::Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, values).await?;
        Ok(())
    }

    async fn pop_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>> {
        let Some(count) = NonZeroUsize::new(count) else {
            return Ok(vec![]);
        };
        let mut conn = self.manager.clone();
        Ok(conn.lpop(key, Some(count)).await?)
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.manager.clone();
        Ok(conn.llen(key).await?)
    }

    async fn peek_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(vec![]);
        }
        let mut conn = self.manager.clone();
        Ok(conn.lrange(key, 0, count as isize - 1).await?)
    }

    async fn list_all(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut conn = self.manager.clone();
        Ok(conn.lrange(key, 0, -1).await?)
    }
}

/// In-process store for tests and single-node development runs.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<MemoryKvInner>>,
}

#[derive(Default)]
struct MemoryKvInner {
    values: HashMap<String, (Vec<u8>, Instant)>,
    lists: HashMap<String, VecDeque<Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        match inner.values.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                inner.values.remove(key);
                Ok(None)
            },
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        self.inner
            .lock()
            .values
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.values.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn push_back(&self, key: &str, values: Vec<Vec<u8>>) -> anyhow::Result<()> {
        self.inner
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .extend(values);
        Ok(())
    }

    async fn pop_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(vec![]);
        };
        let n = count.min(list.len());
        Ok(list.drain(..n).collect())
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self.inner.lock().lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn peek_front(&self, key: &str, count: usize) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .lists
            .get(key)
            .map_or_else(Vec::new, |l| l.iter().take(count).cloned().collect()))
    }

    async fn list_all(&self, key: &str) -> anyhow::Result<Vec<Vec<u8>>> {
        Ok(self
            .inner
            .lock()
            .lists
            .get(key)
            .map_or_else(Vec::new, |l| l.iter().cloned().collect()))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_list_fifo_order() {
        let kv = MemoryKv::new();
        kv.push_back("q", vec![b"a".to_vec(), b"b".to_vec()])
            .await
            .unwrap();
        kv.push_back("q", vec![b"c".to_vec()]).await.unwrap();
        assert_eq!(kv.list_len("q").await.unwrap(), 3);

        assert_eq!(kv.peek_front("q", 2).await.unwrap(), vec![
            b"a".to_vec(),
            b"b".to_vec()
        ]);
        // Peek does not consume.
        assert_eq!(kv.list_len("q").await.unwrap(), 3);

        assert_eq!(kv.pop_front("q", 2).await.unwrap(), vec![
            b"a".to_vec(),
            b"b".to_vec()
        ]);
        assert_eq!(kv.pop_front("q", 5).await.unwrap(), vec![b"c".to_vec()]);
        assert_eq!(kv.pop_front("q", 1).await.unwrap(), Vec::<Vec<u8>>::new());
    }

    #[tokio::test]
    async fn test_value_ttl() {
        let kv = MemoryKv::new();
        kv.set_with_ttl("live", b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_with_ttl("dead", b"1".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(kv.get("live").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get("dead").await.unwrap(), None);
        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.delete("live").await.unwrap();
        assert_eq!(kv.get("live").await.unwrap(), None);
    }
}
