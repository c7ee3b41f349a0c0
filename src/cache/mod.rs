//! The ephemeral cache: exclusively owns `ChunkResult` (SPEC_FULL.md §3, §6).
//! Key layout: `chunks:<meeting_id>:<chunk_id>`, TTL 3600s, enumerated by a
//! pattern-scan on `chunks:<meeting_id>:*`.

mod redis_cache;

pub use redis_cache::RedisChunkCache;

use crate::domain::ChunkResult;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

const CHUNK_TTL_SECONDS: u64 = 3600;

fn chunk_key(meeting_id: Uuid, chunk_id: i32) -> String {
    format!("chunks:{meeting_id}:{chunk_id}")
}

fn chunk_pattern(meeting_id: Uuid) -> String {
    format!("chunks:{meeting_id}:*")
}

#[async_trait]
pub trait ChunkCache: Send + Sync {
    async fn save_chunk(&self, meeting_id: Uuid, result: &ChunkResult) -> Result<()>;

    /// All chunks currently recorded for a meeting, sorted by `chunk_id`
    /// (§4.3 step 1).
    async fn get_all_chunks(&self, meeting_id: Uuid) -> Result<Vec<ChunkResult>>;

    /// The completion counter read back in §4.2 step 5.
    async fn count_chunks(&self, meeting_id: Uuid) -> Result<usize>;

    /// Deletes every `chunks:<meeting_id>:*` key (§4.3 step 6).
    async fn delete_chunks(&self, meeting_id: Uuid) -> Result<()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory `ChunkCache` for unit and integration tests — no TTL
    //! enforcement since tests never run long enough to observe it.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeChunkCache {
        entries: Mutex<HashMap<(Uuid, i32), ChunkResult>>,
    }

    impl FakeChunkCache {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ChunkCache for FakeChunkCache {
        async fn save_chunk(&self, meeting_id: Uuid, result: &ChunkResult) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert((meeting_id, result.chunk_id), result.clone());
            Ok(())
        }

        async fn get_all_chunks(&self, meeting_id: Uuid) -> Result<Vec<ChunkResult>> {
            let mut results: Vec<ChunkResult> = self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|((m, _), _)| *m == meeting_id)
                .map(|(_, v)| v.clone())
                .collect();
            results.sort_by_key(|c| c.chunk_id);
            Ok(results)
        }

        async fn count_chunks(&self, meeting_id: Uuid) -> Result<usize> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter(|(m, _)| *m == meeting_id)
                .count())
        }

        async fn delete_chunks(&self, meeting_id: Uuid) -> Result<()> {
            self.entries.lock().unwrap().retain(|(m, _), _| *m != meeting_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn save_then_count_then_delete_round_trips() {
        let cache = FakeChunkCache::new();
        let meeting_id = Uuid::new_v4();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(0, vec![]))
            .await
            .unwrap();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(1, vec![]))
            .await
            .unwrap();
        assert_eq!(cache.count_chunks(meeting_id).await.unwrap(), 2);

        cache.delete_chunks(meeting_id).await.unwrap();
        assert_eq!(cache.count_chunks(meeting_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_all_chunks_sorts_by_chunk_id() {
        let cache = FakeChunkCache::new();
        let meeting_id = Uuid::new_v4();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(2, vec![]))
            .await
            .unwrap();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(0, vec![]))
            .await
            .unwrap();
        cache
            .save_chunk(meeting_id, &ChunkResult::success(1, vec![]))
            .await
            .unwrap();

        let chunks = cache.get_all_chunks(meeting_id).await.unwrap();
        let ids: Vec<i32> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
