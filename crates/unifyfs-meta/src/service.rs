use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream};
use prost::Message;
use tonic::{Request, Response, Status};

use crate::key::{AttrKey, ExtentKey};
use crate::store::{ExtentValue, ShardStore};

/// How many records a single `RangeGetBatch` message carries before the
/// scan result is split into another batch. Keeps any one streamed reply
/// message bounded regardless of how large a shard's local scan turns out
/// to be.
const BATCH_PAGE_SIZE: usize = 256;

/// The `ExtentShard` gRPC surface (spec.md §4.3, §4.4) over a local
/// [`ShardStore`]: one metadata server's point-of-contact for the puts and
/// range gets `unifyfs_meta::ExtentKv` fans out to it. Grounded on
/// `connector-init`'s `tonic::transport::Server` wiring for the "one struct
/// wraps the storage handle and implements the generated server trait"
/// shape, adapted from a proxying connector to a storage-backed shard.
pub struct ExtentShardService {
    store: Arc<ShardStore>,
}

impl ExtentShardService {
    pub fn new(store: Arc<ShardStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl proto_unifyfs::extent_shard_server::ExtentShard for ExtentShardService {
    async fn batch_put(
        &self,
        request: Request<proto_unifyfs::PutRequest>,
    ) -> Result<Response<proto_unifyfs::PutReply>, Status> {
        let records: Vec<(ExtentKey, ExtentValue)> = request
            .into_inner()
            .records
            .into_iter()
            .filter_map(from_proto_record)
            .collect();

        match self.store.put_extents(&records) {
            Ok(()) => Ok(Response::new(proto_unifyfs::PutReply { ok: true, error: String::new() })),
            Err(err) => Ok(Response::new(proto_unifyfs::PutReply { ok: false, error: err.to_string() })),
        }
    }

    type RangeGetStream = Pin<Box<dyn Stream<Item = Result<proto_unifyfs::RangeGetBatch, Status>> + Send + 'static>>;

    async fn range_get(
        &self,
        request: Request<proto_unifyfs::RangeGetRequest>,
    ) -> Result<Response<Self::RangeGetStream>, Status> {
        let mut records = Vec::new();
        for range in request.into_inner().ranges {
            let start = range.start.ok_or_else(|| Status::invalid_argument("range missing start"))?;
            let end = range.end.ok_or_else(|| Status::invalid_argument("range missing end"))?;
            let start = ExtentKey { gfid: start.gfid, offset: start.offset };
            let end = ExtentKey { gfid: end.gfid, offset: end.offset };

            match self.store.range_get_extents(start, end) {
                Ok(found) => records.extend(found),
                Err(err) => {
                    let batch = proto_unifyfs::RangeGetBatch { ordinal: 0, error: -1, records: Vec::new() };
                    tracing::warn!(%err, "range get failed locally");
                    let stream = stream::once(async move { Ok(batch) });
                    return Ok(Response::new(Box::pin(stream)));
                }
            }
        }

        let batches: Vec<proto_unifyfs::RangeGetBatch> = records
            .chunks(BATCH_PAGE_SIZE)
            .enumerate()
            .map(|(ordinal, chunk)| proto_unifyfs::RangeGetBatch {
                ordinal: ordinal as u32,
                error: 0,
                records: chunk.iter().map(|(k, v)| to_proto_record(*k, *v)).collect(),
            })
            .collect();

        let stream = stream::iter(batches.into_iter().map(Ok));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn attr_put(
        &self,
        request: Request<proto_unifyfs::AttrPutRequest>,
    ) -> Result<Response<proto_unifyfs::AttrPutReply>, Status> {
        for record in request.into_inner().records {
            let key = AttrKey(record.gfid as u64);
            if let Err(err) = self.store.put_attr(key, &record.encode_to_vec()) {
                return Ok(Response::new(proto_unifyfs::AttrPutReply { ok: false, error: err.to_string() }));
            }
        }
        Ok(Response::new(proto_unifyfs::AttrPutReply { ok: true, error: String::new() }))
    }

    async fn attr_get(
        &self,
        request: Request<proto_unifyfs::AttrGetRequest>,
    ) -> Result<Response<proto_unifyfs::AttrGetReply>, Status> {
        let gfid = request.into_inner().gfid;
        let key = AttrKey(gfid as u64);

        let stored = self
            .store
            .get_attr(key)
            .map_err(|err| Status::internal(err.to_string()))?;

        match stored {
            Some(bytes) => {
                let record = proto_unifyfs::AttrRecord::decode(bytes.as_slice())
                    .map_err(|err| Status::internal(format!("corrupt attribute record: {err}")))?;
                Ok(Response::new(proto_unifyfs::AttrGetReply { found: true, record: Some(record) }))
            }
            None => Ok(Response::new(proto_unifyfs::AttrGetReply { found: false, record: None })),
        }
    }
}

fn to_proto_record(key: ExtentKey, value: ExtentValue) -> proto_unifyfs::ExtentRecord {
    proto_unifyfs::ExtentRecord {
        key: Some(proto_unifyfs::ExtentKey { gfid: key.gfid, offset: key.offset }),
        value: Some(proto_unifyfs::ExtentValue {
            addr: value.addr,
            length: value.length,
            delegator_id: value.delegator_id,
            app_id: value.app_id,
            rank: value.rank,
        }),
    }
}

fn from_proto_record(record: proto_unifyfs::ExtentRecord) -> Option<(ExtentKey, ExtentValue)> {
    let key = record.key?;
    let value = record.value?;
    Some((
        ExtentKey { gfid: key.gfid, offset: key.offset },
        ExtentValue {
            addr: value.addr,
            length: value.length,
            delegator_id: value.delegator_id,
            app_id: value.app_id,
            rank: value.rank,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::StreamExt;
    use proto_unifyfs::extent_shard_server::ExtentShard;

    fn service() -> (tempfile::TempDir, ExtentShardService) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(ShardStore::open(dir.path(), "test-shard").unwrap());
        (dir, ExtentShardService::new(store))
    }

    #[tokio::test]
    async fn batch_put_then_range_get_round_trips_through_the_service() {
        let (_dir, svc) = service();

        let put = proto_unifyfs::PutRequest {
            records: vec![to_proto_record(
                ExtentKey { gfid: 1, offset: 0 },
                ExtentValue { addr: 1000, length: 10, delegator_id: 0, app_id: 0, rank: 0 },
            )],
        };
        let reply = svc.batch_put(Request::new(put)).await.unwrap().into_inner();
        assert!(reply.ok);

        let get = proto_unifyfs::RangeGetRequest {
            ranges: vec![proto_unifyfs::KeyRange {
                start: Some(proto_unifyfs::ExtentKey { gfid: 1, offset: 0 }),
                end: Some(proto_unifyfs::ExtentKey { gfid: 1, offset: 100 }),
            }],
        };
        let mut stream = svc.range_get(Request::new(get)).await.unwrap().into_inner();
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch.error, 0);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].value.as_ref().unwrap().addr, 1000);
    }

    #[tokio::test]
    async fn attr_put_then_get_round_trips_through_the_service() {
        let (_dir, svc) = service();

        let record = proto_unifyfs::AttrRecord {
            gfid: 7,
            fid: 7,
            attr: Some(proto_unifyfs::FileAttr { size: 4096, mode: 0o644, uid: 0, gid: 0, atime: 0, mtime: 0, ctime: 0 }),
            filename: "/tmp/example".to_string(),
        };
        let put = proto_unifyfs::AttrPutRequest { records: vec![record] };
        let reply = svc.attr_put(Request::new(put)).await.unwrap().into_inner();
        assert!(reply.ok);

        let got = svc
            .attr_get(Request::new(proto_unifyfs::AttrGetRequest { gfid: 7 }))
            .await
            .unwrap()
            .into_inner();
        assert!(got.found);
        assert_eq!(got.record.unwrap().filename, "/tmp/example");

        let missing = svc
            .attr_get(Request::new(proto_unifyfs::AttrGetRequest { gfid: 404 }))
            .await
            .unwrap()
            .into_inner();
        assert!(!missing.found);
    }
}
