//! Double-slot swap chain state machine

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::Backend;
use crate::error::{GfxError, GfxResult};
use crate::graphics::Extent2D;

/// Identity of the window a surface presents to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

/// Presentation state of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No swap chain has been built yet
    Uninitialized,
    /// One swap chain presents, nothing pending
    Active,
    /// A replacement swap chain is being built in the unused slot
    Resizing,
}

/// Mailbox for size-changed notifications from the windowing thread
///
/// Only the latest extent is kept. The surface picks it up on its next
/// acquisition.
#[derive(Debug, Clone, Default)]
pub struct ResizeNotifier {
    pending: Arc<Mutex<Option<Extent2D>>>,
}

impl ResizeNotifier {
    /// Record a new framebuffer size
    pub fn notify(&self, extent: Extent2D) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(extent);
    }

    /// Take the latest size, if one arrived since the last call
    pub fn take(&self) -> Option<Extent2D> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

struct SwapChainSlot<C> {
    chain: C,
    extent: Extent2D,
    buffer_count: u32,
    back_buffer: u32,
}

/// Two alternating swap-chain slots for one window
pub struct WindowSurface<B: Backend> {
    slots: [Option<SwapChainSlot<B::SwapChain>>; 2],
    /// Previously active chains and the generation they were retired at
    retired: Vec<(u64, B::SwapChain)>,
    surface: B::Surface,
    backend: Arc<B>,
    id: WindowId,
    active: usize,
    state: SurfaceState,
    /// Latest extent requested for the window
    extent: Extent2D,
    buffers: u32,
    notifier: ResizeNotifier,
    presented_frames: u64,
}

impl<B: Backend> WindowSurface<B> {
    /// Wrap a backend surface; the first swap chain is built on first acquisition
    pub fn new(backend: &Arc<B>, id: WindowId, surface: B::Surface, extent: Extent2D, buffers: u32) -> Self {
        Self {
            slots: [None, None],
            retired: Vec::new(),
            surface,
            backend: Arc::clone(backend),
            id,
            active: 0,
            state: SurfaceState::Uninitialized,
            extent,
            buffers,
            notifier: ResizeNotifier::default(),
            presented_frames: 0,
        }
    }

    /// Window identity
    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Mailbox the windowing thread posts size changes to
    pub fn notifier(&self) -> ResizeNotifier {
        self.notifier.clone()
    }

    /// Current state
    pub fn state(&self) -> SurfaceState {
        self.state
    }

    /// Latest requested extent
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Extent of the presenting swap chain
    pub fn active_extent(&self) -> Option<Extent2D> {
        self.slots[self.active].as_ref().map(|slot| slot.extent)
    }

    /// Image extent of the presenting swap chain as the backend built it
    ///
    /// Differs from [`WindowSurface::active_extent`] when the platform
    /// clamps the request to the surface capabilities.
    pub fn presentable_extent(&self) -> Option<Extent2D> {
        self.slots[self.active]
            .as_ref()
            .map(|slot| self.backend.swap_chain_extent(&slot.chain))
    }

    /// Buffers in the presenting swap chain, zero before the first acquisition
    pub fn buffer_count(&self) -> u32 {
        self.slots[self.active].as_ref().map_or(0, |slot| slot.buffer_count)
    }

    /// Index the next acquisition expects
    pub fn back_buffer_index(&self) -> u32 {
        self.slots[self.active].as_ref().map_or(0, |slot| slot.back_buffer)
    }

    /// Swap chains currently held in the two slots
    pub fn swap_chain_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Retired swap chains still waiting for the device
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Frames presented since creation
    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }

    pub(crate) fn active_chain_mut(&mut self) -> Option<&mut B::SwapChain> {
        self.slots[self.active].as_mut().map(|slot| &mut slot.chain)
    }

    /// Resize to `extent`
    ///
    /// The replacement is built in the unused slot while the current chain
    /// keeps presenting. A pending replacement that never presented is
    /// superseded and destroyed. Zero-sized extents (minimized windows) are
    /// recorded and applied once the window has a size again.
    pub fn resize(&mut self, extent: Extent2D) -> GfxResult<()> {
        self.extent = extent;
        if self.state == SurfaceState::Uninitialized || extent.is_empty() {
            return Ok(());
        }
        self.begin_resize(extent)
    }

    fn begin_resize(&mut self, extent: Extent2D) -> GfxResult<()> {
        let pending = 1 - self.active;
        let superseded = self.slots[pending].take();

        let previous = superseded
            .as_ref()
            .or(self.slots[self.active].as_ref())
            .map(|slot| &slot.chain);
        let created = self
            .backend
            .create_swap_chain(&mut self.surface, extent, self.buffers, previous);
        if superseded.is_some() {
            log::debug!("[SWAPCHAIN] Superseded pending swap chain for window {:?}", self.id);
        }
        drop(superseded);

        let chain = match created {
            Ok(chain) => chain,
            Err(err) => {
                self.state = if self.slots[self.active].is_some() {
                    SurfaceState::Active
                } else {
                    SurfaceState::Uninitialized
                };
                return Err(err);
            }
        };

        let buffer_count = self.backend.swap_chain_buffer_count(&chain);
        self.slots[pending] = Some(SwapChainSlot {
            chain,
            extent,
            buffer_count,
            back_buffer: 0,
        });
        self.state = SurfaceState::Resizing;
        log::debug!(
            "[SWAPCHAIN] Building {}x{} swap chain in slot {pending} for window {:?}",
            extent.width,
            extent.height,
            self.id
        );
        Ok(())
    }

    fn build_initial(&mut self) -> GfxResult<()> {
        if self.extent.is_empty() {
            return Err(GfxError::SurfaceOutOfDate);
        }

        let chain = self
            .backend
            .create_swap_chain(&mut self.surface, self.extent, self.buffers, None)?;
        let buffer_count = self.backend.swap_chain_buffer_count(&chain);
        self.active = 0;
        self.slots[0] = Some(SwapChainSlot {
            chain,
            extent: self.extent,
            buffer_count,
            back_buffer: 0,
        });
        self.state = SurfaceState::Active;
        log::info!(
            "[SWAPCHAIN] Window {:?} presenting at {}x{} with {buffer_count} buffers",
            self.id,
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Switch to the pending chain once the backend reports it ready
    fn poll_pending(&mut self) {
        let pending = 1 - self.active;
        let ready = match self.slots[pending].as_mut() {
            Some(slot) => self.backend.poll_swap_chain(&mut slot.chain),
            None => {
                self.state = SurfaceState::Active;
                return;
            }
        };
        if !ready {
            return;
        }

        if let Some(old) = self.slots[self.active].take() {
            let marker = self.backend.submitted_generation();
            self.retired.push((marker, old.chain));
        }
        self.active = pending;
        self.state = SurfaceState::Active;
        if let Some(slot) = &self.slots[self.active] {
            log::info!(
                "[SWAPCHAIN] Window {:?} switched to {}x{} swap chain",
                self.id,
                slot.extent.width,
                slot.extent.height
            );
        }
    }

    fn collect_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        match self.backend.completed_generation() {
            Ok(completed) => self.retired.retain(|(marker, _)| *marker > completed),
            Err(err) => log::warn!("[SWAPCHAIN] Could not query completed generation: {err}"),
        }
    }

    /// React to an out-of-date surface by rebuilding at the latest extent
    fn surface_lost(&mut self) -> GfxError {
        log::warn!("[SWAPCHAIN] Surface of window {:?} is out of date", self.id);
        if self.state != SurfaceState::Resizing && !self.extent.is_empty() {
            if let Err(err) = self.begin_resize(self.extent) {
                log::warn!("[SWAPCHAIN] Rebuild failed, retrying next frame: {err}");
            }
        }
        GfxError::SurfaceOutOfDate
    }

    /// Acquire the next presentable buffer
    ///
    /// Applies pending resize notifications, builds the first chain, and
    /// switches to a finished replacement before acquiring. Returns
    /// [`GfxError::SurfaceOutOfDate`] when nothing can be presented this
    /// frame; the surface has already started rebuilding in that case.
    pub fn acquire_next_buffer(&mut self) -> GfxResult<u32> {
        if let Some(extent) = self.notifier.take() {
            self.resize(extent)?;
        }

        match self.state {
            SurfaceState::Uninitialized => self.build_initial()?,
            SurfaceState::Resizing => self.poll_pending(),
            SurfaceState::Active => {}
        }
        self.collect_retired();

        // A resize that arrived while minimized is applied once the size returns
        if self.state == SurfaceState::Active
            && !self.extent.is_empty()
            && self.active_extent().is_some_and(|extent| extent != self.extent)
        {
            self.begin_resize(self.extent)?;
        }

        let Some(slot) = self.slots[self.active].as_mut() else {
            return Err(GfxError::SurfaceOutOfDate);
        };
        match self.backend.acquire_next_buffer(&mut slot.chain, slot.back_buffer) {
            Ok(index) => Ok(index),
            Err(GfxError::SurfaceOutOfDate) => Err(self.surface_lost()),
            Err(err) => Err(err),
        }
    }

    /// Present a buffer returned by [`WindowSurface::acquire_next_buffer`]
    ///
    /// Advances the back-buffer index modulo the buffer count.
    pub fn present(&mut self, index: u32) -> GfxResult<()> {
        let Some(slot) = self.slots[self.active].as_mut() else {
            return Err(GfxError::SurfaceOutOfDate);
        };
        let result = self.backend.present(&mut slot.chain, index);
        slot.back_buffer = (index + 1) % slot.buffer_count;

        match result {
            Ok(()) => {
                self.presented_frames += 1;
                Ok(())
            }
            Err(GfxError::SurfaceOutOfDate) => Err(self.surface_lost()),
            Err(err) => Err(err),
        }
    }
}

impl<B: Backend> Drop for WindowSurface<B> {
    fn drop(&mut self) {
        let submitted = self.backend.submitted_generation();
        if let Err(err) = self.backend.wait_for_generation(submitted) {
            log::warn!("[SWAPCHAIN] Destroying swap chains without waiting for the device: {err}");
        }
    }
}

impl<B: Backend> fmt::Debug for WindowSurface<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowSurface")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("extent", &self.extent)
            .field("presentable_extent", &self.presentable_extent())
            .field("active_slot", &self.active)
            .field("buffer_count", &self.buffer_count())
            .field("retired", &self.retired.len())
            .finish()
    }
}
