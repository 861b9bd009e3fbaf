use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::messages::{DeploymentRequest, DeploymentStatusEvent};
use super::{decode_status, encode_request, RequestPublisher, StatusSource};
use crate::db::timed;
use crate::deadline::Deadline;
use crate::error::AppResult;

const FETCH_BATCH: i64 = 100;
const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(5);

/// Appends requests to the `bus_messages` table. Consumers read in
/// `(txid, id)` order, which covers the per-key ordering agents rely on.
#[derive(Clone)]
pub struct PgRequestPublisher {
    pool: PgPool,
    topic: String,
}

impl PgRequestPublisher {
    pub fn new(pool: PgPool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl RequestPublisher for PgRequestPublisher {
    async fn publish(&self, request: &DeploymentRequest) -> AppResult<()> {
        let envelope = encode_request(&self.topic, request)?;
        timed(
            sqlx::query("INSERT INTO bus_messages (topic, message_key, payload) VALUES ($1, $2, $3)")
                .bind(&envelope.topic)
                .bind(&envelope.key)
                .bind(&envelope.payload)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

/// Read position on a topic: the writing transaction id and row id of the
/// last message handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub txid: i64,
    pub id: i64,
}

/// Polls the status topic from `bus_messages`, resuming from the offset
/// committed for this consumer. Delivery is at-least-once: the offset of
/// everything handed out is committed before the next batch is fetched.
///
/// Row ids are allocated at insert time but become visible at commit, so
/// reading in id order alone would skip a row committed behind a larger id
/// already read. Messages are instead read in `(txid, id)` order and only
/// once their writing transaction is older than every transaction still
/// running, which makes the read set below the cursor final.
pub struct PgStatusSource {
    pool: PgPool,
    topic: String,
    consumer: String,
    poll_interval: Duration,
    poll_deadline: Duration,
    buffer: VecDeque<(Cursor, Value)>,
    fetched: Option<Cursor>,
    delivered: Option<Cursor>,
    committed: Option<Cursor>,
}

impl PgStatusSource {
    pub fn new(
        pool: PgPool,
        topic: impl Into<String>,
        consumer: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            topic: topic.into(),
            consumer: consumer.into(),
            poll_interval,
            poll_deadline: DEFAULT_POLL_DEADLINE,
            buffer: VecDeque::new(),
            fetched: None,
            delivered: None,
            committed: None,
        }
    }

    /// Bounds each offset commit plus fetch round trip.
    pub fn with_poll_deadline(mut self, poll_deadline: Duration) -> Self {
        self.poll_deadline = poll_deadline;
        self
    }

    async fn load_offset(&mut self) -> AppResult<Cursor> {
        if let Some(cursor) = self.fetched {
            return Ok(cursor);
        }
        let stored: Option<(i64, i64)> = timed(
            sqlx::query_as(
                "SELECT position_txid, position FROM bus_offsets WHERE consumer = $1 AND topic = $2",
            )
            .bind(&self.consumer)
            .bind(&self.topic)
            .fetch_optional(&self.pool),
        )
        .await?;
        let cursor = stored
            .map(|(txid, id)| Cursor { txid, id })
            .unwrap_or_default();
        debug!(
            consumer = %self.consumer,
            topic = %self.topic,
            txid = cursor.txid,
            position = cursor.id,
            "resuming status topic"
        );
        self.fetched = Some(cursor);
        self.committed = Some(cursor);
        Ok(cursor)
    }

    async fn commit(&mut self) -> AppResult<()> {
        let Some(delivered) = self.delivered else {
            return Ok(());
        };
        if self.committed >= Some(delivered) {
            return Ok(());
        }
        timed(
            sqlx::query(
                r#"
                INSERT INTO bus_offsets (consumer, topic, position, position_txid)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (consumer, topic)
                DO UPDATE SET position = EXCLUDED.position,
                              position_txid = EXCLUDED.position_txid,
                              updated = NOW()
                "#,
            )
            .bind(&self.consumer)
            .bind(&self.topic)
            .bind(delivered.id)
            .bind(delivered.txid)
            .execute(&self.pool),
        )
        .await?;
        self.committed = Some(delivered);
        Ok(())
    }

    async fn fetch(&mut self) -> AppResult<usize> {
        let cursor = self.load_offset().await?;
        let rows = timed(
            sqlx::query(
                r#"
                SELECT txid, id, payload FROM bus_messages
                WHERE topic = $1
                  AND (txid, id) > ($2, $3)
                  AND txid < txid_snapshot_xmin(txid_current_snapshot())
                ORDER BY txid, id
                LIMIT $4
                "#,
            )
            .bind(&self.topic)
            .bind(cursor.txid)
            .bind(cursor.id)
            .bind(FETCH_BATCH)
            .fetch_all(&self.pool),
        )
        .await?;
        for row in &rows {
            let position = Cursor {
                txid: row.get("txid"),
                id: row.get("id"),
            };
            let payload: Value = row.get("payload");
            self.buffer.push_back((position, payload));
            self.fetched = Some(position);
        }
        Ok(rows.len())
    }
}

#[async_trait]
impl StatusSource for PgStatusSource {
    async fn recv(&mut self) -> Option<AppResult<DeploymentStatusEvent>> {
        loop {
            if let Some((position, payload)) = self.buffer.pop_front() {
                self.delivered = Some(position);
                return Some(decode_status(payload));
            }

            let deadline = Deadline::after(self.poll_deadline);
            let polled = match deadline.run("commit status offset", self.commit()).await {
                Ok(()) => deadline.run("fetch status messages", self.fetch()).await,
                Err(err) => Err(err),
            };
            match polled {
                Ok(0) => sleep(self.poll_interval).await,
                Ok(_) => {}
                Err(err) => {
                    warn!(?err, topic = %self.topic, "status topic poll failed");
                    sleep(self.poll_interval).await;
                    return Some(Err(err));
                }
            }
        }
    }
}
