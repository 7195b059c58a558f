//! The asset upload sub-protocol.
//!
//! A viewer uploads an asset in one of two ways:
//!
//! ```text
//! small:  AssetUploadRequest{data}         → complete
//! large:  AssetUploadRequest{no data}      → RequestXfer{xfer_id}
//!         SendXferPacket{xfer_id, 0, ...}  → ConfirmXferPacket
//!         SendXferPacket{xfer_id, 1, ...}  → ConfirmXferPacket
//!         SendXferPacket{xfer_id, 2|LAST}  → ConfirmXferPacket, complete
//! ```
//!
//! Uploads are keyed by the viewer's transaction id. The finished asset is
//! stored under `transaction_id.combine(secure_session_id)`, so two
//! sessions that pick the same transaction id never collide.
//!
//! A `CreateInventoryItem` naming the transaction may arrive before or
//! after the last chunk. Before: the item is queued and created on
//! completion. After: the completed asset is attached at once.
//!
//! [`AssetUploader`] is owned by one session's dispatcher; nothing in here
//! is shared.

use std::collections::HashMap;
use std::sync::Arc;

use simgrid_protocol::{AssetId, AssetType, SessionId, TransactionId};
use uuid::Uuid;

use crate::{Asset, RegionError};

/// High bit of an xfer packet number: this is the last chunk.
pub const XFER_LAST_PACKET: u32 = 0x8000_0000;

/// Packet 0 of an xfer starts with the total length as a little-endian
/// `u32`, which is not part of the asset.
const XFER_LENGTH_PREFIX: usize = 4;

/// Fields of a `CreateInventoryItem` waiting on an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub callback_id: u32,
    pub folder_id: Uuid,
    pub inv_type: i8,
    pub wearable_type: u8,
    pub next_owner_mask: u32,
    pub name: String,
    pub description: String,
}

/// Result of [`AssetUploader::begin_upload`].
#[derive(Debug, Clone, PartialEq)]
pub enum UploadStart {
    /// The request carried the whole asset.
    Complete {
        asset: Arc<Asset>,
        pending_item: Option<PendingItem>,
    },
    /// The viewer must now send the asset in xfer packets.
    AwaitingXfer {
        xfer_id: u64,
        asset_id: AssetId,
        asset_type: AssetType,
    },
}

/// Result of [`AssetUploader::append_chunk`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Continuing,
    Complete {
        transaction_id: TransactionId,
        asset: Arc<Asset>,
        pending_item: Option<PendingItem>,
    },
}

/// Result of [`AssetUploader::queue_item`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOutcome {
    /// No upload with that transaction id exists.
    UnknownTransaction,
    /// The upload is still running; the item will come back with its
    /// completion.
    Queued,
    /// An item is already waiting on this upload; the new one was dropped.
    AlreadyQueued,
    /// The upload already finished; create the item with this asset now.
    Ready(Arc<Asset>),
}

#[derive(Debug)]
enum TransactionState {
    Receiving {
        xfer_id: u64,
        next_packet: u32,
        data: Vec<u8>,
    },
    Complete {
        asset: Arc<Asset>,
        /// Xfer id and index of the final chunk, kept so a redelivered
        /// final chunk can still be confirmed.
        xfer: Option<(u64, u32)>,
    },
}

impl TransactionState {
    fn xfer_id(&self) -> Option<u64> {
        match self {
            Self::Receiving { xfer_id, .. } => Some(*xfer_id),
            Self::Complete { xfer, .. } => xfer.map(|(id, _)| id),
        }
    }
}

#[derive(Debug)]
struct AssetTransaction {
    asset_id: AssetId,
    asset_type: AssetType,
    local: bool,
    temporary: bool,
    state: TransactionState,
    pending_item: Option<PendingItem>,
}

impl AssetTransaction {
    fn build_asset(&self, data: Vec<u8>) -> Arc<Asset> {
        Arc::new(Asset {
            local: self.local,
            temporary: self.temporary,
            ..Asset::new(self.asset_id, self.asset_type, data)
        })
    }
}

/// One session's in-flight and recently completed uploads.
#[derive(Debug)]
pub struct AssetUploader {
    secure_session_id: SessionId,
    transactions: HashMap<TransactionId, AssetTransaction>,
    xfers: HashMap<u64, TransactionId>,
}

impl AssetUploader {
    pub fn new(secure_session_id: SessionId) -> Self {
        Self {
            secure_session_id,
            transactions: HashMap::new(),
            xfers: HashMap::new(),
        }
    }

    /// The asset id an upload with this transaction id is stored under.
    pub fn asset_id_for(&self, transaction_id: TransactionId) -> AssetId {
        transaction_id.combine(self.secure_session_id)
    }

    /// Starts an upload.
    ///
    /// With non-empty `initial` data the asset is complete immediately.
    /// Otherwise a random xfer id is allocated and the upload waits for
    /// chunks. Restarting an existing transaction discards its progress
    /// but keeps any queued item.
    pub fn begin_upload(
        &mut self,
        transaction_id: TransactionId,
        asset_type: AssetType,
        temporary: bool,
        local: bool,
        initial: Vec<u8>,
    ) -> UploadStart {
        let asset_id = self.asset_id_for(transaction_id);
        let pending_item = match self.transactions.remove(&transaction_id) {
            Some(previous) => {
                tracing::debug!(%transaction_id, "upload restarted");
                if let Some(xfer_id) = previous.state.xfer_id() {
                    self.xfers.remove(&xfer_id);
                }
                previous.pending_item
            }
            None => None,
        };

        let mut txn = AssetTransaction {
            asset_id,
            asset_type,
            local,
            temporary,
            state: TransactionState::Receiving {
                xfer_id: 0,
                next_packet: 0,
                data: Vec::new(),
            },
            pending_item,
        };

        if !initial.is_empty() {
            let asset = txn.build_asset(initial);
            txn.state = TransactionState::Complete {
                asset: Arc::clone(&asset),
                xfer: None,
            };
            let pending_item = txn.pending_item.take();
            self.transactions.insert(transaction_id, txn);
            tracing::debug!(%transaction_id, %asset_id, "inline upload complete");
            return UploadStart::Complete {
                asset,
                pending_item,
            };
        }

        let xfer_id = self.allocate_xfer_id();
        if let TransactionState::Receiving { xfer_id: id, .. } = &mut txn.state {
            *id = xfer_id;
        }
        self.transactions.insert(transaction_id, txn);
        self.xfers.insert(xfer_id, transaction_id);
        tracing::debug!(%transaction_id, xfer_id, "awaiting xfer");
        UploadStart::AwaitingXfer {
            xfer_id,
            asset_id,
            asset_type,
        }
    }

    fn allocate_xfer_id(&self) -> u64 {
        loop {
            let id: u64 = rand::random();
            if id != 0 && !self.xfers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Adds one xfer chunk.
    ///
    /// `packet` carries the chunk index in its low 31 bits and the
    /// [`XFER_LAST_PACKET`] marker in the high bit.
    ///
    /// # Errors
    /// - [`RegionError::UnknownXfer`]: no running upload has this xfer id
    /// - [`RegionError::OutOfOrder`]: the index is not the next expected
    ///   one; the chunk is ignored. A completed upload answers a repeat of
    ///   its final chunk this way until it is released.
    /// - [`RegionError::MalformedAsset`]: chunk 0 is shorter than its
    ///   length prefix
    pub fn append_chunk(
        &mut self,
        xfer_id: u64,
        packet: u32,
        data: &[u8],
    ) -> Result<ChunkOutcome, RegionError> {
        let transaction_id = *self.xfers.get(&xfer_id).ok_or(RegionError::UnknownXfer(xfer_id))?;
        let txn = self
            .transactions
            .get_mut(&transaction_id)
            .ok_or(RegionError::UnknownXfer(xfer_id))?;
        let index = packet & !XFER_LAST_PACKET;
        let (next_packet, buffer) = match &mut txn.state {
            TransactionState::Receiving {
                next_packet,
                data: buffer,
                ..
            } => (next_packet, buffer),
            TransactionState::Complete {
                xfer: Some((_, last)),
                ..
            } if index <= *last => {
                return Err(RegionError::OutOfOrder {
                    expected: *last + 1,
                    got: index,
                });
            }
            TransactionState::Complete { .. } => return Err(RegionError::UnknownXfer(xfer_id)),
        };

        if index != *next_packet {
            return Err(RegionError::OutOfOrder {
                expected: *next_packet,
                got: index,
            });
        }

        let body = if index == 0 {
            data.get(XFER_LENGTH_PREFIX..).ok_or_else(|| {
                RegionError::MalformedAsset("first xfer packet shorter than its length prefix".into())
            })?
        } else {
            data
        };
        buffer.extend_from_slice(body);
        *next_packet += 1;

        if packet & XFER_LAST_PACKET == 0 {
            return Ok(ChunkOutcome::Continuing);
        }

        let bytes = std::mem::take(buffer);
        let asset = txn.build_asset(bytes);
        txn.state = TransactionState::Complete {
            asset: Arc::clone(&asset),
            xfer: Some((xfer_id, index)),
        };
        let pending_item = txn.pending_item.take();
        tracing::debug!(%transaction_id, asset_id = %asset.id, bytes = asset.data.len(), "xfer complete");
        Ok(ChunkOutcome::Complete {
            transaction_id,
            asset,
            pending_item,
        })
    }

    /// Attaches a `CreateInventoryItem` to an upload.
    pub fn queue_item(&mut self, transaction_id: TransactionId, item: PendingItem) -> QueueOutcome {
        let Some(txn) = self.transactions.get_mut(&transaction_id) else {
            return QueueOutcome::UnknownTransaction;
        };
        match &txn.state {
            TransactionState::Complete { asset, .. } => QueueOutcome::Ready(Arc::clone(asset)),
            TransactionState::Receiving { .. } if txn.pending_item.is_some() => {
                QueueOutcome::AlreadyQueued
            }
            TransactionState::Receiving { .. } => {
                txn.pending_item = Some(item);
                QueueOutcome::Queued
            }
        }
    }

    /// The finished asset of a completed upload.
    pub fn completed_asset(&self, transaction_id: TransactionId) -> Option<Arc<Asset>> {
        match &self.transactions.get(&transaction_id)?.state {
            TransactionState::Complete { asset, .. } => Some(Arc::clone(asset)),
            TransactionState::Receiving { .. } => None,
        }
    }

    /// Forgets a transaction once its asset has been attached to an item.
    pub fn release(&mut self, transaction_id: TransactionId) {
        if let Some(xfer_id) = self
            .transactions
            .remove(&transaction_id)
            .and_then(|txn| txn.state.xfer_id())
        {
            self.xfers.remove(&xfer_id);
        }
    }

    /// Number of transactions still held, running or completed.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Drops every transaction. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let n = self.transactions.len();
        self.transactions.clear();
        self.xfers.clear();
        n
    }
}
