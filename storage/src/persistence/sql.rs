use alloy::primitives::Address;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use timelock_types::{
    flow::COMPOUND_GRACE_PERIOD, ChainMetadata, ContractRole, DeliveryKey, DeliveryRecord, Flow,
    FlowKey, NotificationConfig, ScanProgress, TimelockEvent, TimelockStandard,
};
use url::Url;

use super::Persistence;

/// Postgres-backed persistence. See `storage/schema.sql` for the tables.
#[derive(Clone)]
pub struct SqlPersistence {
    pool: PgPool,
}

impl SqlPersistence {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn chain_from_row(row: &PgRow) -> anyhow::Result<ChainMetadata> {
    let explorers: serde_json::Value = row.try_get("block_explorer_urls")?;
    let rpcs: serde_json::Value = row.try_get("official_rpcs")?;
    let chain_id = row.try_get::<i64, _>("chain_id")? as u64;
    Ok(ChainMetadata {
        chain_id,
        name: row.try_get("chain_name")?,
        native_symbol: row.try_get("native_symbol")?,
        native_decimals: row.try_get::<i16, _>("native_decimals")? as u8,
        block_explorer_urls: serde_json::from_value(explorers)
            .context("malformed block_explorer_urls")?,
        official_rpcs: serde_json::from_value::<Vec<String>>(rpcs)
            .context("malformed official_rpcs")?
            .into_iter()
            .filter_map(|raw| match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(err) => {
                    tracing::warn!(chain_id, %raw, %err, "skipping unparseable RPC url");
                    None
                },
            })
            .collect(),
        is_testnet: row.try_get("is_testnet")?,
    })
}

fn flow_from_row(row: &PgRow) -> anyhow::Result<Flow> {
    Ok(Flow {
        key: FlowKey {
            standard: row.try_get::<String, _>("standard")?.parse()?,
            chain_id: row.try_get::<i64, _>("chain_id")? as u64,
            contract_address: row.try_get::<String, _>("contract_address")?.parse()?,
            flow_id: row.try_get::<String, _>("flow_id")?.parse()?,
        },
        initiator: row
            .try_get::<Option<String>, _>("initiator")?
            .map(|s| s.parse())
            .transpose()?,
        target: row
            .try_get::<Option<String>, _>("target")?
            .map(|s| s.parse())
            .transpose()?,
        value: row.try_get::<String, _>("value")?.parse()?,
        function_signature: row.try_get("function_signature")?,
        call_data: row.try_get::<String, _>("call_data")?.parse()?,
        eta: row
            .try_get::<Option<i64>, _>("eta")?
            .map(|eta| eta as u64),
        status: row.try_get::<String, _>("status")?.parse()?,
        proposed_at: row.try_get("proposed_at")?,
        queued_at: row.try_get("queued_at")?,
        executed_at: row.try_get("executed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn config_from_row(row: &PgRow) -> anyhow::Result<NotificationConfig> {
    Ok(NotificationConfig {
        id: row.try_get("id")?,
        user_address: row.try_get("user_address")?,
        channel: row.try_get::<String, _>("channel")?.parse()?,
        name: row.try_get("name")?,
        bot_token: row.try_get("bot_token")?,
        chat_id: row.try_get("chat_id")?,
        webhook_url: row.try_get("webhook_url")?,
        secret: row.try_get("secret")?,
        is_active: row.try_get("is_active")?,
    })
}

const FLOW_COLUMNS: &str = "standard, chain_id, contract_address, flow_id, initiator, target, \
                            value, function_signature, call_data, eta, status, proposed_at, \
                            queued_at, executed_at, cancelled_at";

#[async_trait]
impl Persistence for SqlPersistence {
    async fn active_chains(&self, include_testnets: bool) -> anyhow::Result<Vec<ChainMetadata>> {
        let rows = sqlx::query(
            "SELECT chain_id, chain_name, native_symbol, native_decimals, block_explorer_urls, \
             official_rpcs, is_testnet FROM support_chains \
             WHERE is_active = TRUE AND ($1 OR is_testnet = FALSE) ORDER BY chain_id",
        )
        .bind(include_testnets)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chain_from_row).collect()
    }

    async fn chain_metadata(&self, chain_id: u64) -> anyhow::Result<Option<ChainMetadata>> {
        let row = sqlx::query(
            "SELECT chain_id, chain_name, native_symbol, native_decimals, block_explorer_urls, \
             official_rpcs, is_testnet FROM support_chains WHERE chain_id = $1",
        )
        .bind(i64::try_from(chain_id)?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(chain_from_row).transpose()
    }

    async fn timelock_remark(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Option<String>> {
        let query = match standard {
            TimelockStandard::Compound => {
                "SELECT remark FROM compound_timelocks WHERE chain_id = $1 AND contract_address = $2"
            },
            TimelockStandard::OpenZeppelin => {
                "SELECT remark FROM openzeppelin_timelocks WHERE chain_id = $1 AND \
                 contract_address = $2"
            },
        };
        let row = sqlx::query(query)
            .bind(i64::try_from(chain_id)?)
            .bind(format!("{contract_address:#x}"))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|row| row.try_get::<Option<String>, _>("remark"))
            .transpose()?
            .flatten())
    }

    async fn scan_progress(&self, chain_id: u64) -> anyhow::Result<Option<ScanProgress>> {
        let row = sqlx::query(
            "SELECT chain_id, last_scanned_block, latest_network_block, status, error, \
             updated_at FROM block_scan_progress WHERE chain_id = $1",
        )
        .bind(i64::try_from(chain_id)?)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(ScanProgress {
                chain_id: row.try_get::<i64, _>("chain_id")? as u64,
                last_scanned_block: row.try_get::<i64, _>("last_scanned_block")? as u64,
                latest_network_block: row.try_get::<i64, _>("latest_network_block")? as u64,
                status: row.try_get::<String, _>("status")?.parse()?,
                error: row.try_get("error")?,
                updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_scan_progress(&self, progress: &ScanProgress) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO block_scan_progress \
             (chain_id, last_scanned_block, latest_network_block, status, error, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (chain_id) DO UPDATE SET \
             last_scanned_block = EXCLUDED.last_scanned_block, \
             latest_network_block = EXCLUDED.latest_network_block, \
             status = EXCLUDED.status, error = EXCLUDED.error, updated_at = EXCLUDED.updated_at",
        )
        .bind(i64::try_from(progress.chain_id)?)
        .bind(i64::try_from(progress.last_scanned_block)?)
        .bind(i64::try_from(progress.latest_network_block)?)
        .bind(progress.status.as_str())
        .bind(&progress.error)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_event(&self, event: &TimelockEvent) -> anyhow::Result<()> {
        let query = match event.standard() {
            TimelockStandard::Compound => {
                "INSERT INTO compound_transactions \
                 (tx_hash, chain_id, contract_address, block_number, block_timestamp, initiator, \
                 event_type, event_data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (tx_hash) DO NOTHING"
            },
            TimelockStandard::OpenZeppelin => {
                "INSERT INTO openzeppelin_transactions \
                 (tx_hash, chain_id, contract_address, block_number, block_timestamp, initiator, \
                 event_type, event_data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (tx_hash) DO NOTHING"
            },
        };
        sqlx::query(query)
            .bind(format!("{:#x}", event.tx_hash))
            .bind(i64::try_from(event.chain_id)?)
            .bind(format!("{:#x}", event.contract_address))
            .bind(i64::try_from(event.block_number)?)
            .bind(i64::try_from(event.block_timestamp)?)
            .bind(format!("{:#x}", event.initiator))
            .bind(event.kind.name())
            .bind(serde_json::to_value(&event.kind)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn flow(&self, key: &FlowKey) -> anyhow::Result<Option<Flow>> {
        let row = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE standard = $1 AND chain_id = $2 AND \
             contract_address = $3 AND flow_id = $4",
        ))
        .bind(key.standard.as_str())
        .bind(i64::try_from(key.chain_id)?)
        .bind(format!("{:#x}", key.contract_address))
        .bind(format!("{:#x}", key.flow_id))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(flow_from_row).transpose()
    }

    async fn upsert_flow(&self, flow: &Flow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO flows (standard, chain_id, contract_address, flow_id, initiator, \
             target, value, function_signature, call_data, eta, status, proposed_at, queued_at, \
             executed_at, cancelled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (standard, chain_id, contract_address, flow_id) DO UPDATE SET \
             initiator = EXCLUDED.initiator, target = EXCLUDED.target, value = EXCLUDED.value, \
             function_signature = EXCLUDED.function_signature, call_data = EXCLUDED.call_data, \
             eta = EXCLUDED.eta, status = EXCLUDED.status, proposed_at = EXCLUDED.proposed_at, \
             queued_at = EXCLUDED.queued_at, executed_at = EXCLUDED.executed_at, \
             cancelled_at = EXCLUDED.cancelled_at",
        )
        .bind(flow.key.standard.as_str())
        .bind(i64::try_from(flow.key.chain_id)?)
        .bind(format!("{:#x}", flow.key.contract_address))
        .bind(format!("{:#x}", flow.key.flow_id))
        .bind(flow.initiator.map(|a| format!("{a:#x}")))
        .bind(flow.target.map(|a| format!("{a:#x}")))
        .bind(flow.value.to_string())
        .bind(&flow.function_signature)
        .bind(flow.call_data.to_string())
        .bind(flow.eta.map(i64::try_from).transpose()?)
        .bind(flow.status.as_str())
        .bind(flow.proposed_at)
        .bind(flow.queued_at)
        .bind(flow.executed_at)
        .bind(flow.cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn waiting_flows_due(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE status = 'waiting' AND eta IS NOT NULL AND \
             eta <= $1 ORDER BY eta LIMIT $2",
        ))
        .bind(i64::try_from(now)?)
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(flow_from_row).collect()
    }

    async fn ready_flows_expired(&self, now: u64, limit: usize) -> anyhow::Result<Vec<Flow>> {
        let rows = sqlx::query(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE status = 'ready' AND standard = 'compound' \
             AND eta IS NOT NULL AND eta + $1 <= $2 ORDER BY eta LIMIT $3",
        ))
        .bind(COMPOUND_GRACE_PERIOD.as_secs() as i64)
        .bind(i64::try_from(now)?)
        .bind(i64::try_from(limit)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(flow_from_row).collect()
    }

    async fn upsert_relation(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
        user_address: &str,
        role: ContractRole,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO contract_relations \
             (standard, chain_id, contract_address, user_address, relation, is_active) \
             VALUES ($1, $2, $3, $4, $5, TRUE) \
             ON CONFLICT (standard, chain_id, contract_address, user_address, relation) \
             DO UPDATE SET is_active = TRUE",
        )
        .bind(standard.as_str())
        .bind(i64::try_from(chain_id)?)
        .bind(format!("{contract_address:#x}"))
        .bind(user_address)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribers(
        &self,
        standard: TimelockStandard,
        chain_id: u64,
        contract_address: Address,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_address FROM contract_relations WHERE standard = $1 AND \
             chain_id = $2 AND contract_address = $3 AND is_active = TRUE",
        )
        .bind(standard.as_str())
        .bind(i64::try_from(chain_id)?)
        .bind(format!("{contract_address:#x}"))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok(row.try_get("user_address")?))
            .collect()
    }

    async fn active_configs(&self, user_address: &str) -> anyhow::Result<Vec<NotificationConfig>> {
        let rows = sqlx::query(
            "SELECT id, user_address, channel, name, bot_token, chat_id, webhook_url, secret, \
             is_active FROM notification_configs WHERE user_address = $1 AND is_active = TRUE \
             ORDER BY id",
        )
        .bind(user_address)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(config_from_row).collect()
    }

    async fn delivery_succeeded(&self, key: &DeliveryKey) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM notification_logs WHERE channel = $1 AND \
             user_address = $2 AND config_id = $3 AND flow_id = $4 AND status_to = $5 AND \
             status = 'success')",
        )
        .bind(key.channel.as_str())
        .bind(&key.user_address)
        .bind(key.config_id)
        .bind(format!("{:#x}", key.flow_id))
        .bind(key.status_to.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get(0)?)
    }

    async fn append_delivery(&self, record: &DeliveryRecord) -> anyhow::Result<()> {
        // The unique index is the sole exactly-once mechanism: one row per
        // key, and a successful row is never downgraded.
        sqlx::query(
            "INSERT INTO notification_logs \
             (channel, user_address, config_id, flow_id, status_to, status, error, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (channel, user_address, config_id, flow_id, status_to) DO UPDATE SET \
             status = EXCLUDED.status, error = EXCLUDED.error, sent_at = EXCLUDED.sent_at \
             WHERE notification_logs.status <> 'success'",
        )
        .bind(record.key.channel.as_str())
        .bind(&record.key.user_address)
        .bind(record.key.config_id)
        .bind(format!("{:#x}", record.key.flow_id))
        .bind(record.key.status_to.as_str())
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_error(&self, scope: &str, message: &str) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO error_logs (scope, message, created_at) VALUES ($1, $2, $3)")
            .bind(scope)
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
