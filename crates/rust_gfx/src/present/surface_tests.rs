//! Tests for double-slot presentation on the headless backend

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::sync::Arc;

    use crate::backend::{Backend, HeadlessBackend};
    use crate::backend::headless::ObjectKind;
    use crate::config::{CompletionMode, GfxConfig};
    use crate::error::{GfxError, GfxResult};
    use crate::graphics::Extent2D;

    const START: Extent2D = Extent2D::new(640, 480);

    fn window(config: &GfxConfig) -> (Arc<HeadlessBackend>, WindowSurface<HeadlessBackend>) {
        crate::foundation::logging::init_for_tests();
        let backend = HeadlessBackend::new(config);
        let raw = backend.create_surface();
        let surface = WindowSurface::new(&backend, WindowId(1), raw, START, config.swap_chain_buffers);
        (backend, surface)
    }

    fn frame(surface: &mut WindowSurface<HeadlessBackend>) -> GfxResult<u32> {
        let index = surface.acquire_next_buffer()?;
        surface.present(index)?;
        Ok(index)
    }

    fn settle(surface: &mut WindowSurface<HeadlessBackend>) {
        for _ in 0..16 {
            if surface.state() == SurfaceState::Active {
                return;
            }
            frame(surface).unwrap();
        }
        panic!("surface never left {:?}", surface.state());
    }

    /// The first acquisition builds the swap chain at the window extent
    #[test]
    fn test_first_acquire_initializes() {
        let (backend, mut surface) = window(&GfxConfig::headless());
        assert_eq!(surface.state(), SurfaceState::Uninitialized);
        assert_eq!(surface.presentable_extent(), None);
        assert_eq!(surface.buffer_count(), 0);
        assert_eq!(backend.live(ObjectKind::SwapChain), 0);

        assert_eq!(surface.acquire_next_buffer().unwrap(), 0);
        assert_eq!(surface.state(), SurfaceState::Active);
        assert_eq!(surface.active_extent(), Some(START));
        assert_eq!(surface.presentable_extent(), Some(START));
        assert_eq!(surface.buffer_count(), 2);
        assert_eq!(backend.live(ObjectKind::SwapChain), 1);
    }

    /// After M presents the back-buffer index is M mod the buffer count
    #[test]
    fn test_back_buffer_cycling() {
        for buffers in [2, 3] {
            let (_backend, mut surface) = window(&GfxConfig::headless().with_swap_chain_buffers(buffers));

            for presented in 0..20u32 {
                assert_eq!(frame(&mut surface).unwrap(), presented % buffers);
                assert_eq!(surface.back_buffer_index(), (presented + 1) % buffers);
            }
            assert_eq!(surface.presented_frames(), 20);
        }
    }

    /// Fifty alternating resizes converge to one swap chain without leaks
    #[test]
    fn test_resize_stability() {
        let config = GfxConfig::headless().with_resize_latency(2);
        let (backend, mut surface) = window(&config);
        frame(&mut surface).unwrap();

        let extents = [Extent2D::new(800, 600), Extent2D::new(1024, 768)];
        for k in 0..50 {
            surface.resize(extents[k % 2]).unwrap();
            // Presentation keeps going on the old chain while the new one builds
            frame(&mut surface).unwrap();
            assert!(surface.swap_chain_count() <= 2);
            assert!(backend.live(ObjectKind::SwapChain) <= 2);
        }
        settle(&mut surface);

        assert_eq!(surface.swap_chain_count(), 1);
        assert_eq!(surface.retired_count(), 0);
        assert_eq!(surface.buffer_count(), 2);
        assert_eq!(surface.active_extent(), Some(extents[1]));
        assert_eq!(surface.presentable_extent(), Some(extents[1]));
        assert_eq!(backend.live(ObjectKind::SwapChain), 1);
        assert_eq!(backend.live(ObjectKind::SwapChainImage), 2);
    }

    /// A resize does not block presentation while the replacement builds
    #[test]
    fn test_resize_does_not_block() {
        let (_backend, mut surface) = window(&GfxConfig::headless().with_resize_latency(3));
        frame(&mut surface).unwrap();

        surface.resize(Extent2D::new(320, 240)).unwrap();
        assert_eq!(surface.state(), SurfaceState::Resizing);
        for _ in 0..3 {
            frame(&mut surface).unwrap();
            assert_eq!(surface.active_extent(), Some(START));
        }

        frame(&mut surface).unwrap();
        assert_eq!(surface.state(), SurfaceState::Active);
        assert_eq!(surface.active_extent(), Some(Extent2D::new(320, 240)));
    }

    /// A second resize before the first completes supersedes it
    #[test]
    fn test_resize_supersedes_pending() {
        let (backend, mut surface) = window(&GfxConfig::headless().with_resize_latency(5));
        frame(&mut surface).unwrap();

        surface.resize(Extent2D::new(100, 100)).unwrap();
        surface.resize(Extent2D::new(200, 200)).unwrap();
        assert_eq!(backend.live(ObjectKind::SwapChain), 2);

        settle(&mut surface);
        assert_eq!(surface.active_extent(), Some(Extent2D::new(200, 200)));
        assert_eq!(backend.live(ObjectKind::SwapChain), 1);
    }

    /// An invalidated surface reports out-of-date once and then recovers
    #[test]
    fn test_out_of_date_reenters_resizing() {
        let (backend, mut surface) = window(&GfxConfig::headless());
        frame(&mut surface).unwrap();

        backend.invalidate_surfaces();
        let err = frame(&mut surface).unwrap_err();
        assert!(matches!(err, GfxError::SurfaceOutOfDate));
        assert_eq!(surface.state(), SurfaceState::Resizing);

        frame(&mut surface).unwrap();
        assert_eq!(surface.state(), SurfaceState::Active);
        assert_eq!(surface.active_extent(), Some(START));
        assert_eq!(backend.live(ObjectKind::SwapChain), 1);
    }

    /// Notifications from another thread are applied on the next acquisition
    #[test]
    fn test_notifier_from_window_thread() {
        let (_backend, mut surface) = window(&GfxConfig::headless());
        frame(&mut surface).unwrap();

        let notifier = surface.notifier();
        std::thread::spawn(move || {
            notifier.notify(Extent2D::new(300, 300));
            notifier.notify(Extent2D::new(500, 400));
        })
        .join()
        .unwrap();

        frame(&mut surface).unwrap();
        settle(&mut surface);
        assert_eq!(surface.extent(), Extent2D::new(500, 400));
        assert_eq!(surface.active_extent(), Some(Extent2D::new(500, 400)));
    }

    /// A minimized window keeps presenting and resizes once restored
    #[test]
    fn test_minimized_window() {
        let (_backend, mut surface) = window(&GfxConfig::headless());
        frame(&mut surface).unwrap();

        surface.resize(Extent2D::new(0, 0)).unwrap();
        assert_eq!(surface.state(), SurfaceState::Active);
        frame(&mut surface).unwrap();

        surface.resize(Extent2D::new(300, 200)).unwrap();
        settle(&mut surface);
        assert_eq!(surface.active_extent(), Some(Extent2D::new(300, 200)));
    }

    /// The replaced chain is kept until the device passes its retirement generation
    #[test]
    fn test_retired_chain_waits_for_device() {
        let config = GfxConfig::headless().with_completion(CompletionMode::Manual);
        let (backend, mut surface) = window(&config);
        frame(&mut surface).unwrap();

        backend.submit(&[], None).unwrap();
        surface.resize(Extent2D::new(128, 128)).unwrap();
        frame(&mut surface).unwrap();

        assert_eq!(surface.swap_chain_count(), 1);
        assert_eq!(surface.retired_count(), 1);
        assert_eq!(backend.live(ObjectKind::SwapChain), 2);

        backend.complete_all();
        frame(&mut surface).unwrap();
        assert_eq!(surface.retired_count(), 0);
        assert_eq!(backend.live(ObjectKind::SwapChain), 1);
    }
}
