use super::{chunk_key, chunk_pattern, ChunkCache, CHUNK_TTL_SECONDS};
use crate::domain::ChunkResult;
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

/// `ChunkCache` backed by Redis. Holds one `ConnectionManager`, which
/// transparently reconnects across the lifetime of a long-running worker
/// process — every call borrows the same managed connection rather than
/// opening a fresh one per message (SPEC_FULL.md §6).
#[derive(Clone)]
pub struct RedisChunkCache {
    conn: ConnectionManager,
}

impl RedisChunkCache {
    pub async fn connect(cache_url: &str) -> Result<Self> {
        let client = redis::Client::open(cache_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisChunkCache { conn })
    }
}

#[async_trait]
impl ChunkCache for RedisChunkCache {
    async fn save_chunk(&self, meeting_id: Uuid, result: &ChunkResult) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(result)?;
        let key = chunk_key(meeting_id, result.chunk_id);
        conn.set_ex::<_, _, ()>(key, payload, CHUNK_TTL_SECONDS)
            .await?;
        Ok(())
    }

    async fn get_all_chunks(&self, meeting_id: Uuid) -> Result<Vec<ChunkResult>> {
        let mut conn = self.conn.clone();
        let pattern = chunk_pattern(meeting_id);
        let keys: Vec<String> = conn.keys(pattern).await?;

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            if let Some(raw) = raw {
                results.push(serde_json::from_str::<ChunkResult>(&raw)?);
            }
        }
        results.sort_by_key(|c| c.chunk_id);
        Ok(results)
    }

    async fn count_chunks(&self, meeting_id: Uuid) -> Result<usize> {
        let mut conn = self.conn.clone();
        let pattern = chunk_pattern(meeting_id);
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys.len())
    }

    async fn delete_chunks(&self, meeting_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = chunk_pattern(meeting_id);
        let keys: Vec<String> = conn.keys(pattern).await?;
        if !keys.is_empty() {
            conn.del::<_, ()>(keys).await?;
        }
        Ok(())
    }
}
