use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tonic::{Request, Response, Status};
use unifyfs_client::FlushCoordinator;

use crate::Registry;

/// The peer side of C5's dispatch (spec.md §4.6 "Service Manager"):
/// services inbound read batches against the local [`Registry`] of
/// hosted clients, and drains+flushes a client's index region on fsync.
/// Generalized from `connector-init`'s single struct-wraps-a-handle
/// server shape, adapted from a process proxy to a storage-backed
/// service.
pub struct DelegatorService {
    registry: Arc<Registry>,
    flush: FlushCoordinator,
}

impl DelegatorService {
    pub fn new(registry: Arc<Registry>, flush: FlushCoordinator) -> Self {
        Self { registry, flush }
    }

    fn service_one(&self, binding: proto_unifyfs::ReadBinding) -> proto_unifyfs::ReadReply {
        match self.registry.read_at(binding.dest_app_id, binding.dest_client_id, binding.dest_log_offset, binding.length) {
            Ok(payload) => proto_unifyfs::ReadReply {
                src_offset: binding.src_offset,
                length: binding.length,
                src_fid: binding.src_fid,
                errcode: 0,
                payload,
            },
            Err(err) => {
                tracing::warn!(%err, dest_app_id = binding.dest_app_id, dest_client_id = binding.dest_client_id, "read request failed");
                proto_unifyfs::ReadReply {
                    src_offset: binding.src_offset,
                    length: 0,
                    src_fid: binding.src_fid,
                    errcode: -1,
                    payload: Vec::new(),
                }
            }
        }
    }
}

#[tonic::async_trait]
impl proto_unifyfs::delegator_server::Delegator for DelegatorService {
    type ReadBatchStream = Pin<Box<dyn Stream<Item = Result<proto_unifyfs::ReadReply, Status>> + Send + 'static>>;

    async fn read_batch(
        &self,
        request: Request<proto_unifyfs::ReadRequestBatch>,
    ) -> Result<Response<Self::ReadBatchStream>, Status> {
        let mut bindings = request.into_inner().bindings;
        // FIFO within arrival-time equivalence classes (spec.md §4.6).
        bindings.sort_by_key(|b| b.arrival_time_micros);

        let replies: Vec<proto_unifyfs::ReadReply> = bindings.into_iter().map(|b| self.service_one(b)).collect();
        Ok(Response::new(Box::pin(stream::iter(replies.into_iter().map(Ok)))))
    }

    async fn fsync(
        &self,
        request: Request<proto_unifyfs::FsyncRequest>,
    ) -> Result<Response<proto_unifyfs::FsyncAck>, Status> {
        let req = request.into_inner();

        let Some(entries) = self.registry.drain_index(req.app_id, req.client_id) else {
            return Ok(Response::new(proto_unifyfs::FsyncAck { status: -1 }));
        };

        match self.flush.flush_index(req.app_id, req.client_id, &entries).await {
            Ok(()) => Ok(Response::new(proto_unifyfs::FsyncAck { status: 0 })),
            Err(err) => {
                tracing::warn!(%err, app_id = req.app_id, client_id = req.client_id, "fsync flush failed");
                Ok(Response::new(proto_unifyfs::FsyncAck { status: -1 }))
            }
        }
    }
}
