//! The key–value store fabric
//!
//! [`KvStore`] owns everything: per-block ring pairs and data banks, per-
//! block scratch resources and ticket tables, the shared worker pool, and
//! the host worker threads. Geometry is fixed at construction; workers start
//! on [`open_db`](KvStore::open_db) and stop when EXIT is broadcast to every
//! block.

pub mod async_get;
pub mod device;
pub mod dispatcher;
pub mod resources;

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::backend::KvBackend;
use crate::config::StoreConfig;
use crate::grid::{self, BlockContext};
use crate::memory::{DataBank, Residence};
use crate::ring::{
    Command, CompletionQueue, CqConsumer, CqProducer, RequestMessage, SqConsumer, SqProducer,
    SubmissionQueue,
};
use crate::store::async_get::TicketTable;
use crate::store::dispatcher::{run_worker, WorkerContext};
use crate::store::resources::BlockResources;
use crate::{store_error, Result};

/// Accelerator-visible state of one thread block.
pub(crate) struct BlockShared {
    pub sq: SqProducer,
    pub cq: CqConsumer,
    pub host_bank: Arc<DataBank>,
    pub device_bank: Arc<DataBank>,
    pub resources: BlockResources,
    pub tickets: Arc<TicketTable>,
}

/// Host-side ring endpoints parked between construction and `open_db`.
struct HostEndpoints {
    sq: SqConsumer,
    cq: CqProducer,
}

enum LifeCycle {
    /// Constructed; endpoints waiting for the workers that will own them.
    Created(Vec<HostEndpoints>),
    /// Workers running.
    Open(Vec<JoinHandle<()>>),
    /// Workers joined; terminal except for `delete_db`.
    Closed,
}

/// GPU-initiated key–value store over per-block submission/completion rings.
pub struct KvStore {
    config: StoreConfig,
    backend: Arc<dyn KvBackend>,
    blocks: Vec<BlockShared>,
    pool: Arc<rayon::ThreadPool>,
    lifecycle: Mutex<LifeCycle>,
}

impl KvStore {
    /// Build a store with the given geometry over an injected backend.
    ///
    /// Allocation failure or invalid geometry is fatal here; the backend is
    /// not opened until [`open_db`](Self::open_db).
    pub fn new(config: StoreConfig, backend: Arc<dyn KvBackend>) -> Result<Self> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("gridkv-pool-{i}"))
            .build()
            .map_err(|e| store_error!("cannot build worker pool: {}", e))?;

        let mut blocks = Vec::with_capacity(config.num_blocks);
        let mut endpoints = Vec::with_capacity(config.num_blocks);
        for _ in 0..config.num_blocks {
            let (sq_producer, sq_consumer) =
                SubmissionQueue::new(config.queue_size, config.max_key_size)?.endpoints();
            let (cq_producer, cq_consumer) =
                CompletionQueue::new(config.queue_size, config.max_num_keys)?.endpoints();
            blocks.push(BlockShared {
                sq: sq_producer,
                cq: cq_consumer,
                host_bank: Arc::new(DataBank::new(
                    config.queue_size,
                    config.max_value_size,
                    Residence::HostPinned,
                )?),
                device_bank: Arc::new(DataBank::new(
                    config.queue_size,
                    config.max_value_size,
                    Residence::DeviceShared,
                )?),
                resources: BlockResources::new(config.max_num_keys),
                tickets: Arc::new(TicketTable::new(config.queue_size)),
            });
            endpoints.push(HostEndpoints {
                sq: sq_consumer,
                cq: cq_producer,
            });
        }

        Ok(Self {
            config,
            backend,
            blocks,
            pool: Arc::new(pool),
            lifecycle: Mutex::new(LifeCycle::Created(endpoints)),
        })
    }

    /// Open the backend and start one host worker per block.
    pub fn open_db(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, LifeCycle::Closed) {
            LifeCycle::Created(endpoints) => {
                if let Err(e) = self.backend.open() {
                    *lifecycle = LifeCycle::Created(endpoints);
                    return Err(e);
                }
                let mut handles = Vec::with_capacity(endpoints.len());
                let mut spawn_err = None;
                for (block_idx, ep) in endpoints.into_iter().enumerate() {
                    let worker = WorkerContext {
                        block_idx,
                        sq: ep.sq,
                        cq: ep.cq,
                        host_bank: self.blocks[block_idx].host_bank.clone(),
                        device_bank: self.blocks[block_idx].device_bank.clone(),
                        tickets: self.blocks[block_idx].tickets.clone(),
                        backend: self.backend.clone(),
                        pool: self.pool.clone(),
                        delay: self.config.worker_delay,
                    };
                    match std::thread::Builder::new()
                        .name(format!("gridkv-worker-{block_idx}"))
                        .spawn(move || run_worker(worker))
                    {
                        Ok(handle) => handles.push(handle),
                        Err(e) => {
                            spawn_err = Some(store_error!("cannot spawn worker {}: {}", block_idx, e));
                            break;
                        }
                    }
                }
                if let Some(err) = spawn_err {
                    // Unwind the workers that did start, then surface the
                    // failure; the store stays shut down.
                    for block in &self.blocks[..handles.len()] {
                        Self::push_exit(block);
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    let _ = self.backend.close();
                    return Err(err);
                }
                *lifecycle = LifeCycle::Open(handles);
                Ok(())
            }
            state @ LifeCycle::Open(_) => {
                *lifecycle = state;
                Err(store_error!("store already open"))
            }
            LifeCycle::Closed => Err(store_error!("store already shut down")),
        }
    }

    /// Broadcast EXIT to every block, join the workers, close the backend.
    ///
    /// A second close without a matching open returns an error. No kernel
    /// may be in flight; an operation racing EXIT on the same block is a
    /// caller error.
    pub fn close_db(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, LifeCycle::Closed) {
            LifeCycle::Open(handles) => {
                for block in &self.blocks {
                    Self::push_exit(block);
                }
                for handle in handles {
                    if handle.join().is_err() {
                        log::error!("a gridkv worker panicked before exit");
                    }
                }
                self.backend.close()
            }
            state @ LifeCycle::Created(_) => {
                *lifecycle = state;
                Err(store_error!("store not open"))
            }
            LifeCycle::Closed => Err(store_error!("store not open")),
        }
    }

    /// Destroy the backend's persisted state. The store must not be open.
    pub fn delete_db(&self) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if matches!(&*lifecycle, LifeCycle::Open(_)) {
            return Err(store_error!("cannot delete an open store"));
        }
        self.backend.destroy()
    }

    /// Launch a kernel over the store's grid geometry. Convenience wrapper
    /// around [`grid::launch`] with `num_blocks x block_size` threads.
    pub fn launch_kernel<F>(&self, kernel: F) -> Result<()>
    where
        F: Fn(&BlockContext) + Send + Sync,
    {
        grid::launch(self.config.num_blocks, self.config.block_size, kernel)
    }

    /// With no kernel in flight the closing thread is the sole producer of
    /// every submission ring, so pushing EXIT from here is within the SPSC
    /// contract.
    fn push_exit(block: &BlockShared) {
        let pos = loop {
            if let Some(pos) = block.sq.try_claim(1) {
                break pos;
            }
            std::hint::spin_loop();
        };
        let mut msg = RequestMessage::zeroed();
        msg.cmd = Command::Exit as u32;
        msg.request_id = block.resources.next_request_id();
        msg.increment_size = 1;
        block.sq.write_slot(pos, &msg);
        block.sq.publish(pos.wrapping_add(1));
    }

    pub(crate) fn shared(&self, ctx: &BlockContext) -> &BlockShared {
        &self.blocks[ctx.block_index()]
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of thread blocks (and host workers).
    pub fn num_blocks(&self) -> usize {
        self.config.num_blocks
    }

    /// Threads per block.
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Ring depth per block.
    pub fn queue_size(&self) -> usize {
        self.config.queue_size
    }

    /// Payload capacity per slot.
    pub fn max_value_size(&self) -> usize {
        self.config.max_value_size
    }

    /// Key capacity per slot.
    pub fn max_key_size(&self) -> usize {
        self.config.max_key_size
    }

    /// Maximum keys per batch.
    pub fn max_num_keys(&self) -> usize {
        self.config.max_num_keys
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        let open = matches!(&*self.lifecycle.lock(), LifeCycle::Open(_));
        if open {
            if let Err(e) = self.close_db() {
                log::warn!("closing store on drop failed: {e}");
            }
        }
    }
}
