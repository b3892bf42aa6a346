//! Transactional data factory
//!
//! [`DataFactory`] is the single entry point for creating GPU resources.
//! Resources are created in batches by [`DataFactory::commit_transaction`]:
//! either every object of the batch becomes visible together, or none do.
//! The returned [`GraphicsDataToken`] is the sole owner of the batch and
//! releasing it is the only way to destroy the batch.
//!
//! Destruction happens in two phases. Releasing a token removes the batch
//! from the registry at once; the backend objects are freed only after the
//! device has finished every frame submitted before the release.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::Backend;
use crate::config::{BindingLimits, GfxConfig};
use crate::error::GfxResult;
use crate::graphics::context::Context;
use crate::graphics::data::{GraphicsData, ResourceCounts};
use crate::graphics::registry::{DataKey, LockedRegistry, Registry};
use crate::graphics::retirement::RetirementQueue;
use crate::graphics::Platform;

struct FactoryShared<B: Backend, R: Registry<B>> {
    backend: Arc<B>,
    registry: R,
    retirement: Mutex<RetirementQueue<B>>,
    limits: BindingLimits,
    /// Bumped by `destroy_all_data` while it drains the registry; tokens from
    /// older epochs may find their batch gone
    epoch: RwLock<u64>,
}

impl<B: Backend, R: Registry<B>> FactoryShared<B, R> {
    fn retirement(&self) -> MutexGuard<'_, RetirementQueue<B>> {
        self.retirement.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> RwLockReadGuard<'_, u64> {
        self.epoch.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch_mut(&self) -> RwLockWriteGuard<'_, u64> {
        self.epoch.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn completed_generation(&self) -> u64 {
        match self.backend.completed_generation() {
            Ok(generation) => generation,
            Err(err) => {
                log::warn!("[RETIRE] Could not query completed generation: {err}");
                0
            }
        }
    }

    fn release(&self, key: DataKey, epoch: u64) {
        match self.registry.remove(key) {
            Some(data) => self.retire(data),
            // Blocks while a teardown is draining, so a miss always sees its epoch
            None if epoch != *self.epoch() => {
                log::trace!("[RETIRE] Batch was already destroyed by destroy_all_data");
            }
            None => panic!("graphics data released twice"),
        }
    }

    fn retire(&self, data: GraphicsData<B>) {
        let marker = self.backend.submitted_generation();
        if marker <= self.completed_generation() {
            log::trace!("[RETIRE] Freeing {:?} immediately", data.counts());
            drop(data);
        } else {
            log::trace!("[RETIRE] Retiring {:?} until generation {marker}", data.counts());
            self.retirement().push(marker, data);
        }
        self.collect_retired();
    }

    fn collect_retired(&self) -> usize {
        let completed = self.completed_generation();
        // Freed after the queue lock is released
        let ready = self.retirement().take_completed(completed);
        ready.len()
    }
}

/// Creates, owns and destroys batches of GPU resources
///
/// The default registry is shared by every thread. Transactions may run
/// concurrently from any number of loader threads; the registry lock is only
/// held for the insertion of a finished batch.
pub struct DataFactory<B: Backend, R: Registry<B> = LockedRegistry<B>> {
    shared: Arc<FactoryShared<B, R>>,
}

impl<B: Backend> DataFactory<B> {
    /// Factory with the shared, mutex-protected registry
    pub fn new(backend: Arc<B>, config: &GfxConfig) -> Self {
        Self::with_registry(backend, config.binding_limits, LockedRegistry::default())
    }
}

impl<B: Backend, R: Registry<B>> DataFactory<B, R> {
    /// Factory with a caller-provided registry
    pub fn with_registry(backend: Arc<B>, limits: BindingLimits, registry: R) -> Self {
        log::info!("[REGISTRY] Created data factory for {}", backend.platform_name());
        Self {
            shared: Arc::new(FactoryShared {
                backend,
                registry,
                retirement: Mutex::new(RetirementQueue::default()),
                limits,
                epoch: RwLock::new(0),
            }),
        }
    }

    /// Backend the factory creates objects on
    pub fn backend(&self) -> &Arc<B> {
        &self.shared.backend
    }

    /// Backend family
    pub fn platform(&self) -> Platform {
        self.shared.backend.platform()
    }

    /// Backend name
    pub fn platform_name(&self) -> &'static str {
        self.shared.backend.platform_name()
    }

    /// Whether data bindings need an explicit vertex format
    pub fn binding_needs_vertex_format(&self) -> bool {
        self.shared.backend.binding_needs_vertex_format()
    }

    /// Samples per texel of render textures and pipelines
    pub fn draw_samples(&self) -> u32 {
        self.shared.backend.draw_samples()
    }

    /// Layout limits shared by every pipeline
    pub fn binding_limits(&self) -> BindingLimits {
        self.shared.limits
    }

    /// Build a batch of resources and commit it atomically
    ///
    /// `build` receives a [`Context`] to create resources with. If it
    /// returns an error, every object it created is released at once and
    /// nothing is committed. On success the batch is inserted into the
    /// registry in one step and a token owning it is returned.
    ///
    /// ```ignore
    /// let token = factory.commit_transaction(|ctx| {
    ///     vertices = Some(ctx.new_static_buffer_typed(BufferUse::Vertex, &VERTICES)?);
    ///     Ok(())
    /// })?;
    /// ```
    pub fn commit_transaction<F>(&self, build: F) -> GfxResult<GraphicsDataToken<B, R>>
    where
        F: FnOnce(&mut Context<'_, B>) -> GfxResult<()>,
    {
        let shared = &self.shared;
        let mut data = GraphicsData::new();

        let result = {
            let mut context = Context::new(&shared.backend, &mut data, shared.limits);
            build(&mut context)
        };

        if let Err(err) = result {
            log::warn!(
                "[TRANSACTION] Transaction failed, releasing {} staged objects: {err}",
                data.counts().total()
            );
            drop(data);
            return Err(err);
        }

        let counts = data.counts();
        let (epoch, key) = {
            let epoch = shared.epoch();
            (*epoch, shared.registry.insert(data))
        };
        log::info!("[TRANSACTION] Committed batch {key:?} with {counts:?}");

        Ok(GraphicsDataToken {
            key: Some(key),
            epoch,
            shared: Arc::clone(shared),
        })
    }

    /// Release a token created by this factory
    ///
    /// Equivalent to [`GraphicsDataToken::release`].
    ///
    /// # Panics
    /// If the token belongs to another factory.
    pub fn destroy_data(&self, token: GraphicsDataToken<B, R>) {
        assert!(
            Arc::ptr_eq(&self.shared, &token.shared),
            "graphics data token released through a different factory"
        );
        token.release();
    }

    /// Destroy every committed batch, waiting for the device first
    ///
    /// Tokens outstanding at this point become inert: releasing them later
    /// does nothing. Returns the number of committed batches destroyed.
    pub fn destroy_all_data(&self) -> usize {
        let shared = &self.shared;
        let drained = {
            let mut epoch = shared.epoch_mut();
            *epoch += 1;
            shared.registry.drain()
        };

        let submitted = shared.backend.submitted_generation();
        if let Err(err) = shared.backend.wait_for_generation(submitted) {
            log::warn!("[RETIRE] Waiting for generation {submitted} failed, destroying anyway: {err}");
        }

        let retired = shared.retirement().take_all();
        let destroyed = drained.len();
        if destroyed > 0 || !retired.is_empty() {
            log::info!(
                "[REGISTRY] Destroying {destroyed} committed and {} retired batches",
                retired.len()
            );
        }
        drop(drained);
        drop(retired);
        destroyed
    }

    /// Free retired batches the device has finished with
    ///
    /// Also runs on every release; render loops call it once per frame so
    /// memory is reclaimed even when nothing is released. Returns the number
    /// of batches freed.
    pub fn collect_retired(&self) -> usize {
        self.shared.collect_retired()
    }

    /// Number of committed batches
    pub fn live_batches(&self) -> usize {
        self.shared.registry.len()
    }

    /// Number of released batches waiting for the device
    pub fn pending_retirements(&self) -> usize {
        self.shared.retirement().len()
    }

    /// Generation the device must complete before every pending retirement is freed
    pub fn retirement_horizon(&self) -> Option<u64> {
        self.shared.retirement().newest_marker()
    }

    /// Whether `token`'s batch is still committed in this factory
    pub fn contains(&self, token: &GraphicsDataToken<B, R>) -> bool {
        Arc::ptr_eq(&self.shared, &token.shared) && token.is_committed()
    }
}

impl<B: Backend, R: Registry<B>> Drop for DataFactory<B, R> {
    fn drop(&mut self) {
        self.destroy_all_data();
    }
}

impl<B: Backend, R: Registry<B>> fmt::Debug for DataFactory<B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataFactory")
            .field("platform", &self.platform())
            .field("live_batches", &self.live_batches())
            .field("pending_retirements", &self.pending_retirements())
            .field("retirement_horizon", &self.retirement_horizon())
            .finish()
    }
}

/// Sole owner of one committed batch
///
/// Dropping the token releases the batch; [`GraphicsDataToken::release`]
/// does the same explicitly. Handles created in the batch report themselves
/// as gone once the device has finished with it.
#[must_use = "dropping a token destroys its graphics data"]
pub struct GraphicsDataToken<B: Backend, R: Registry<B> = LockedRegistry<B>> {
    key: Option<DataKey>,
    epoch: u64,
    shared: Arc<FactoryShared<B, R>>,
}

impl<B: Backend, R: Registry<B>> GraphicsDataToken<B, R> {
    /// Release the batch
    pub fn release(mut self) {
        if let Some(key) = self.key.take() {
            self.shared.release(key, self.epoch);
        }
    }

    /// Whether the batch is still committed
    pub fn is_committed(&self) -> bool {
        self.key.is_some_and(|key| self.shared.registry.contains(key))
    }

    /// Registry key of the batch, `None` once released
    pub fn key(&self) -> Option<DataKey> {
        self.key
    }

    /// Object counts of the batch, `None` once destroyed
    pub fn counts(&self) -> Option<ResourceCounts> {
        self.key.and_then(|key| self.shared.registry.counts(key))
    }
}

impl<B: Backend, R: Registry<B>> Drop for GraphicsDataToken<B, R> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.release(key, self.epoch);
        }
    }
}

impl<B: Backend, R: Registry<B>> fmt::Debug for GraphicsDataToken<B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsDataToken")
            .field("key", &self.key)
            .field("committed", &self.is_committed())
            .finish()
    }
}
