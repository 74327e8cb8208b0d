//! DynamoDB TableBackend implementation.
//!
//! Both secondary indexes must project all attributes: range reads decode
//! payloads straight from index items.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::config::timeout::TimeoutConfig;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeValue, DeleteRequest, Put, Select, TransactWriteItem, Update, WriteRequest,
};
use aws_sdk_dynamodb::Client;
use tracing::{debug, info, warn};

use super::backend::{
    BackendError, BackendResult, IndexQuery, ItemKey, JournalRecord, SequenceBound,
    SnapshotCondition, SnapshotRecord, TableBackend, TransactWrite,
};
use super::schema::*;
use crate::config::DynamoConfig;

type Item = HashMap<String, AttributeValue>;

/// Maximum number of requests in one BatchWriteItem call.
const BATCH_WRITE_LIMIT: usize = 25;

/// DynamoDB implementation of TableBackend.
#[derive(Clone)]
pub struct DynamoBackend {
    client: Client,
}

impl std::fmt::Debug for DynamoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoBackend").finish_non_exhaustive()
    }
}

impl DynamoBackend {
    /// Create a client from the SDK default chain plus `config` overrides.
    pub async fn from_config(config: &DynamoConfig) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);

        if let Some(region) = &config.region {
            builder = builder.region(Region::new(region.clone()));
        }

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(timeout_ms) = config.operation_timeout_ms {
            let timeout_config = TimeoutConfig::builder()
                .operation_timeout(Duration::from_millis(timeout_ms))
                .build();
            builder = builder.timeout_config(timeout_config);
        }

        info!(endpoint = ?config.endpoint_url, region = ?config.region, "Connected to DynamoDB");

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Wrap a pre-built client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn key_item(key: &ItemKey) -> Item {
        HashMap::from([
            (ATTR_PKEY.to_string(), AttributeValue::S(key.pkey.clone())),
            (ATTR_SKEY.to_string(), AttributeValue::S(key.skey.clone())),
        ])
    }

    fn journal_item(record: JournalRecord) -> Item {
        HashMap::from([
            (ATTR_PKEY.to_string(), AttributeValue::S(record.pkey)),
            (ATTR_SKEY.to_string(), AttributeValue::S(record.skey)),
            (ATTR_AID.to_string(), AttributeValue::S(record.aid)),
            (ATTR_SEQ_NR.to_string(), AttributeValue::N(record.seq_nr.to_string())),
            (ATTR_PAYLOAD.to_string(), AttributeValue::B(Blob::new(record.payload))),
            (
                ATTR_OCCURRED_AT.to_string(),
                AttributeValue::N(record.occurred_at.to_string()),
            ),
        ])
    }

    fn snapshot_item(record: SnapshotRecord) -> Item {
        HashMap::from([
            (ATTR_PKEY.to_string(), AttributeValue::S(record.pkey)),
            (ATTR_SKEY.to_string(), AttributeValue::S(record.skey)),
            (ATTR_AID.to_string(), AttributeValue::S(record.aid)),
            (ATTR_SEQ_NR.to_string(), AttributeValue::N(record.seq_nr.to_string())),
            (ATTR_PAYLOAD.to_string(), AttributeValue::B(Blob::new(record.payload))),
            (ATTR_VERSION.to_string(), AttributeValue::N(record.version.to_string())),
            (ATTR_TTL.to_string(), AttributeValue::N(record.ttl.to_string())),
            (
                ATTR_LAST_UPDATED_AT.to_string(),
                AttributeValue::N(record.last_updated_at.to_string()),
            ),
        ])
    }

    fn get_s(item: &Item, attribute: &'static str) -> BackendResult<String> {
        match item.get(attribute) {
            Some(AttributeValue::S(value)) => Ok(value.clone()),
            Some(_) => Err(BackendError::MalformedItem {
                attribute,
                reason: "expected a string".to_string(),
            }),
            None => Err(BackendError::MalformedItem {
                attribute,
                reason: "missing".to_string(),
            }),
        }
    }

    fn get_n<T: std::str::FromStr>(item: &Item, attribute: &'static str) -> BackendResult<T> {
        match item.get(attribute) {
            Some(AttributeValue::N(value)) => {
                value.parse().map_err(|_| BackendError::MalformedItem {
                    attribute,
                    reason: format!("not a valid number: {value}"),
                })
            }
            Some(_) => Err(BackendError::MalformedItem {
                attribute,
                reason: "expected a number".to_string(),
            }),
            None => Err(BackendError::MalformedItem {
                attribute,
                reason: "missing".to_string(),
            }),
        }
    }

    fn get_b(item: &Item, attribute: &'static str) -> BackendResult<Vec<u8>> {
        match item.get(attribute) {
            Some(AttributeValue::B(blob)) => Ok(blob.as_ref().to_vec()),
            Some(_) => Err(BackendError::MalformedItem {
                attribute,
                reason: "expected binary".to_string(),
            }),
            None => Err(BackendError::MalformedItem {
                attribute,
                reason: "missing".to_string(),
            }),
        }
    }

    fn parse_journal(item: &Item) -> BackendResult<JournalRecord> {
        Ok(JournalRecord {
            pkey: Self::get_s(item, ATTR_PKEY)?,
            skey: Self::get_s(item, ATTR_SKEY)?,
            aid: Self::get_s(item, ATTR_AID)?,
            seq_nr: Self::get_n(item, ATTR_SEQ_NR)?,
            payload: Self::get_b(item, ATTR_PAYLOAD)?,
            occurred_at: Self::get_n(item, ATTR_OCCURRED_AT)?,
        })
    }

    fn parse_snapshot(item: &Item) -> BackendResult<SnapshotRecord> {
        let ttl = match item.get(ATTR_TTL) {
            Some(_) => Self::get_n(item, ATTR_TTL)?,
            None => 0,
        };
        Ok(SnapshotRecord {
            pkey: Self::get_s(item, ATTR_PKEY)?,
            skey: Self::get_s(item, ATTR_SKEY)?,
            aid: Self::get_s(item, ATTR_AID)?,
            seq_nr: Self::get_n(item, ATTR_SEQ_NR)?,
            payload: Self::get_b(item, ATTR_PAYLOAD)?,
            version: Self::get_n(item, ATTR_VERSION)?,
            ttl,
            last_updated_at: Self::get_n(item, ATTR_LAST_UPDATED_AT)?,
        })
    }

    fn transact_item(write: TransactWrite) -> BackendResult<TransactWriteItem> {
        let build_error = |e| BackendError::request("TransactWriteItems", e);

        let item = match write {
            TransactWrite::PutJournal { table, record } => {
                let put = Put::builder()
                    .table_name(table)
                    .set_item(Some(Self::journal_item(record)))
                    .condition_expression("attribute_not_exists(#pk)")
                    .expression_attribute_names("#pk", ATTR_PKEY)
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().put(put).build()
            }
            TransactWrite::PutSnapshot {
                table,
                record,
                condition,
            } => {
                let put = Put::builder()
                    .table_name(table)
                    .set_item(Some(Self::snapshot_item(record)));
                let put = match condition {
                    SnapshotCondition::NotExists => put
                        .condition_expression("attribute_not_exists(#pk)")
                        .expression_attribute_names("#pk", ATTR_PKEY),
                    SnapshotCondition::VersionEquals(expected) => put
                        .condition_expression("#ver = :expected")
                        .expression_attribute_names("#ver", ATTR_VERSION)
                        .expression_attribute_values(
                            ":expected",
                            AttributeValue::N(expected.to_string()),
                        ),
                };
                TransactWriteItem::builder()
                    .put(put.build().map_err(build_error)?)
                    .build()
            }
            TransactWrite::BumpSnapshotVersion {
                table,
                key,
                expected,
                next,
            } => {
                let update = Update::builder()
                    .table_name(table)
                    .set_key(Some(Self::key_item(&key)))
                    .update_expression("SET #ver = :next")
                    .condition_expression("#ver = :expected")
                    .expression_attribute_names("#ver", ATTR_VERSION)
                    .expression_attribute_values(":expected", AttributeValue::N(expected.to_string()))
                    .expression_attribute_values(":next", AttributeValue::N(next.to_string()))
                    .build()
                    .map_err(build_error)?;
                TransactWriteItem::builder().update(update).build()
            }
        };
        Ok(item)
    }

    /// Map a cancelled transaction to the first item whose condition failed.
    fn transact_error(err: SdkError<TransactWriteItemsError>) -> BackendError {
        if let SdkError::ServiceError(service_err) = &err {
            if let TransactWriteItemsError::TransactionCanceledException(cancelled) =
                service_err.err()
            {
                let failed = cancelled.cancellation_reasons().iter().position(|reason| {
                    matches!(
                        reason.code(),
                        Some("ConditionalCheckFailed") | Some("TransactionConflict")
                    )
                });
                if let Some(item) = failed {
                    return BackendError::ConditionFailed { item };
                }
            }
        }
        BackendError::request("TransactWriteItems", err)
    }

    fn is_conditional_check_failed(err: &SdkError<UpdateItemError>) -> bool {
        match err {
            SdkError::ServiceError(service_err) => matches!(
                service_err.err(),
                UpdateItemError::ConditionalCheckFailedException(_)
            ),
            _ => false,
        }
    }

    /// Page through an index query, returning matching items and the count.
    async fn run_query(&self, query: &IndexQuery, count_only: bool) -> BackendResult<(Vec<Item>, usize)> {
        let (op, seq) = match query.bound {
            SequenceBound::AtLeast(n) => (">=", n),
            SequenceBound::After(n) => (">", n),
        };
        let key_condition = format!("#aid = :aid AND #seq {op} :seq");

        let mut items = Vec::new();
        let mut count = 0usize;
        let mut start_key: Option<Item> = None;

        loop {
            let mut request = self
                .client
                .query()
                .table_name(&query.table)
                .index_name(&query.index)
                .key_condition_expression(&key_condition)
                .expression_attribute_names("#aid", ATTR_AID)
                .expression_attribute_names("#seq", ATTR_SEQ_NR)
                .expression_attribute_values(":aid", AttributeValue::S(query.aid.clone()))
                .expression_attribute_values(":seq", AttributeValue::N(seq.to_string()))
                .scan_index_forward(true)
                .set_exclusive_start_key(start_key.take());

            if query.untimed_only {
                request = request
                    .filter_expression("attribute_not_exists(#ttl) OR #ttl = :zero")
                    .expression_attribute_names("#ttl", ATTR_TTL)
                    .expression_attribute_values(":zero", AttributeValue::N("0".to_string()));
            }
            if count_only {
                request = request.select(Select::Count);
            }

            let output = request
                .send()
                .await
                .map_err(|e| BackendError::request("Query", e))?;

            count += output.count().max(0) as usize;
            items.extend(output.items().iter().cloned());

            if let Some(limit) = query.limit {
                if !count_only && items.len() >= limit {
                    items.truncate(limit);
                    break;
                }
            }

            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok((items, count))
    }
}

#[async_trait]
impl TableBackend for DynamoBackend {
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> BackendResult<()> {
        let items = writes
            .into_iter()
            .map(Self::transact_item)
            .collect::<BackendResult<Vec<_>>>()?;
        let item_count = items.len();

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(Self::transact_error)?;

        debug!(items = item_count, "Committed DynamoDB transaction");
        Ok(())
    }

    async fn get_snapshot(&self, table: &str, key: &ItemKey) -> BackendResult<Option<SnapshotRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(Self::key_item(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| BackendError::request("GetItem", e))?;

        output.item().map(Self::parse_snapshot).transpose()
    }

    async fn query_journal(&self, query: &IndexQuery) -> BackendResult<Vec<JournalRecord>> {
        let (items, _) = self.run_query(query, false).await?;
        items.iter().map(Self::parse_journal).collect()
    }

    async fn query_snapshots(&self, query: &IndexQuery) -> BackendResult<Vec<SnapshotRecord>> {
        let (items, _) = self.run_query(query, false).await?;
        items.iter().map(Self::parse_snapshot).collect()
    }

    async fn count_snapshots(&self, query: &IndexQuery) -> BackendResult<usize> {
        let (_, count) = self.run_query(query, true).await?;
        Ok(count)
    }

    async fn batch_delete(&self, table: &str, keys: Vec<ItemKey>) -> BackendResult<usize> {
        let mut deleted = 0;

        for chunk in keys.chunks(BATCH_WRITE_LIMIT) {
            let requests = chunk
                .iter()
                .map(|key| {
                    let delete = DeleteRequest::builder()
                        .set_key(Some(Self::key_item(key)))
                        .build()
                        .map_err(|e| BackendError::request("BatchWriteItem", e))?;
                    Ok(WriteRequest::builder().delete_request(delete).build())
                })
                .collect::<BackendResult<Vec<_>>>()?;

            let output = self
                .client
                .batch_write_item()
                .request_items(table, requests)
                .send()
                .await
                .map_err(|e| BackendError::request("BatchWriteItem", e))?;

            let unprocessed = output
                .unprocessed_items()
                .and_then(|items| items.get(table))
                .map(Vec::len)
                .unwrap_or(0);
            if unprocessed > 0 {
                warn!(table = %table, unprocessed, "BatchWriteItem left items unprocessed");
            }
            deleted += chunk.len() - unprocessed.min(chunk.len());
        }

        Ok(deleted)
    }

    async fn set_ttl(&self, table: &str, key: &ItemKey, expires_at: i64) -> BackendResult<()> {
        let result = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(Self::key_item(key)))
            .update_expression("SET #ttl = :ttl")
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#ttl", ATTR_TTL)
            .expression_attribute_names("#pk", ATTR_PKEY)
            .expression_attribute_values(":ttl", AttributeValue::N(expires_at.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Already gone; nothing left to expire.
            Err(e) if Self::is_conditional_check_failed(&e) => Ok(()),
            Err(e) => Err(BackendError::request("UpdateItem", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_record() -> SnapshotRecord {
        SnapshotRecord {
            pkey: "UserAccount-3".to_string(),
            skey: "UserAccount-u1-0".to_string(),
            aid: "u1".to_string(),
            seq_nr: 0,
            payload: b"{\"name\":\"test\"}".to_vec(),
            version: 4,
            ttl: 0,
            last_updated_at: 1_704_067_200_000,
        }
    }

    #[test]
    fn test_snapshot_item_round_trip() {
        let record = snapshot_record();
        let item = DynamoBackend::snapshot_item(record.clone());
        assert_eq!(DynamoBackend::parse_snapshot(&item).unwrap(), record);
    }

    #[test]
    fn test_journal_item_round_trip() {
        let record = JournalRecord {
            pkey: "UserAccount-3".to_string(),
            skey: "UserAccount-u1-2".to_string(),
            aid: "u1".to_string(),
            seq_nr: 2,
            payload: vec![1, 2, 3],
            occurred_at: 1_704_067_200_000,
        };
        let item = DynamoBackend::journal_item(record.clone());
        assert_eq!(DynamoBackend::parse_journal(&item).unwrap(), record);
    }

    #[test]
    fn test_parse_snapshot_without_ttl_defaults_to_zero() {
        let mut item = DynamoBackend::snapshot_item(snapshot_record());
        item.remove(ATTR_TTL);
        assert_eq!(DynamoBackend::parse_snapshot(&item).unwrap().ttl, 0);
    }

    #[test]
    fn test_parse_snapshot_missing_version() {
        let mut item = DynamoBackend::snapshot_item(snapshot_record());
        item.remove(ATTR_VERSION);
        assert!(matches!(
            DynamoBackend::parse_snapshot(&item),
            Err(BackendError::MalformedItem {
                attribute: "version",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_snapshot_wrong_type() {
        let mut item = DynamoBackend::snapshot_item(snapshot_record());
        item.insert(ATTR_SEQ_NR.to_string(), AttributeValue::S("zero".to_string()));
        assert!(matches!(
            DynamoBackend::parse_snapshot(&item),
            Err(BackendError::MalformedItem {
                attribute: "seq_nr",
                ..
            })
        ));
    }
}
