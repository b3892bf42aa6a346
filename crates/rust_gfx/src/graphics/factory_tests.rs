//! Tests for transactional creation, ownership and deferred destruction

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::collections::HashSet;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::Duration;

    use crate::backend::{Backend, HeadlessBackend};
    use crate::config::{BindingLimits, CompletionMode, GfxConfig};
    use crate::error::{GfxError, GfxResult};
    use crate::graphics::shader::tests::{FRAGMENT_SOURCE, VERTEX_SOURCE};
    use crate::present::{WindowId, WindowSurface};

    /// Position and color for three vertices
    const TRIANGLE: [f32; 21] = [
        0.0, -0.5, 0.0, 1.0, 0.0, 0.0, 1.0, //
        0.5, 0.5, 0.0, 0.0, 1.0, 0.0, 1.0, //
        -0.5, 0.5, 0.0, 0.0, 0.0, 1.0, 1.0,
    ];

    const ELEMENTS: [VertexElementDescriptor; 2] = [
        VertexElementDescriptor::new(VertexSemantic::Position3, 0),
        VertexElementDescriptor::new(VertexSemantic::Color, 0),
    ];

    struct Scene {
        vertices: StaticBuffer<HeadlessBackend>,
        uniforms: DynamicBuffer<HeadlessBackend>,
        format: VertexFormat<HeadlessBackend>,
        pipeline: ShaderPipeline<HeadlessBackend>,
        target: RenderTexture<HeadlessBackend>,
        binding: ShaderDataBinding<HeadlessBackend>,
    }

    fn setup(config: &GfxConfig) -> (Arc<HeadlessBackend>, DataFactory<HeadlessBackend>) {
        crate::foundation::logging::init_for_tests();
        let backend = HeadlessBackend::new(config);
        let factory = DataFactory::new(Arc::clone(&backend), config);
        (backend, factory)
    }

    fn build_scene(ctx: &mut Context<'_, HeadlessBackend>, blobs: Option<&mut ShaderBlobs>) -> GfxResult<Scene> {
        let vertices = ctx.new_static_buffer_typed(BufferUse::Vertex, &TRIANGLE)?;
        let uniforms = ctx.new_dynamic_buffer(BufferUse::Uniform, 64, 1)?;
        let format = ctx.new_vertex_format(&ELEMENTS)?;
        let pipeline = ctx.new_shader_pipeline(
            ShaderSource::new(VERTEX_SOURCE, FRAGMENT_SOURCE),
            blobs,
            &format,
            PipelineState::default(),
        )?;
        let target = ctx.new_render_texture(64, 64, true, false)?;
        let binding = ctx.new_shader_data_binding(
            ShaderDataBindingDesc::new(&pipeline)
                .vertex_format(&format)
                .vertex_buffer(&vertices)
                .uniform(&uniforms, ShaderStages::VERTEX),
        )?;

        Ok(Scene {
            vertices,
            uniforms,
            format,
            pipeline,
            target,
            binding,
        })
    }

    fn commit_scene(factory: &DataFactory<HeadlessBackend>) -> (GraphicsDataToken<HeadlessBackend>, Scene) {
        let mut scene = None;
        let token = factory
            .commit_transaction(|ctx| {
                scene = Some(build_scene(ctx, None)?);
                Ok(())
            })
            .unwrap();
        (token, scene.unwrap())
    }

    fn record_triangle(queue: &mut CommandQueue<HeadlessBackend>, scene: &Scene) {
        queue.set_render_target(&scene.target);
        queue.set_viewport(Rect2D::new(0, 0, 64, 64));
        queue.set_clear_color([0.0, 0.0, 0.0, 1.0]);
        queue.clear_target(true, true);
        queue.set_shader_data_binding(&scene.binding);
        queue.draw(0, 3);
    }

    /// A committed batch exposes every object it created
    #[test]
    fn test_commit_makes_batch_visible() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (token, scene) = commit_scene(&factory);

        assert_eq!(factory.live_batches(), 1);
        assert!(factory.contains(&token));
        assert_eq!(
            token.counts(),
            Some(ResourceCounts {
                buffers: 2,
                textures: 1,
                vertex_formats: 1,
                pipelines: 1,
                bindings: 1,
            })
        );
        assert_eq!(backend.live_counts().resources(), 6);
        assert_eq!(scene.vertices.size(), Some(84));
        assert_eq!(scene.format.layout().map(|layout| layout.vertex_stride), Some(28));
        assert_eq!(scene.pipeline.reflection().map(|r| r.vertex_inputs), Some(vec![0, 1]));
        assert_eq!(
            scene.binding.summary().map(|summary| (summary.uniform_count, summary.has_index_buffer)),
            Some((1, false))
        );
    }

    /// An allocation failure mid-transaction leaves nothing behind
    #[test]
    fn test_failed_transaction_is_atomic() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (_existing, _scene) = commit_scene(&factory);
        let baseline = backend.live_counts();

        // Three buffers succeed, then the vertex format allocation fails
        backend.fail_allocation_after(3);
        let mut first = None;
        let result = factory.commit_transaction(|ctx| {
            let vertices = ctx.new_static_buffer_typed(BufferUse::Vertex, &TRIANGLE)?;
            first = Some(vertices);
            build_scene(ctx, None).map(|_| ())
        });

        assert!(matches!(result, Err(GfxError::OutOfMemory { .. })));
        assert_eq!(factory.live_batches(), 1);
        assert_eq!(backend.live_counts(), baseline);
        assert!(!first.unwrap().is_alive());
    }

    /// A builder that bails out with its own error is rolled back the same way
    #[test]
    fn test_builder_error_rolls_back() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let result = factory.commit_transaction(|ctx| {
            build_scene(ctx, None)?;
            Err(GfxError::Backend("asset missing".to_string()))
        });

        assert!(matches!(result, Err(GfxError::Backend(_))));
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(backend.live_counts().resources(), 0);
    }

    /// A panicking builder releases what it staged while unwinding
    #[test]
    fn test_panicking_builder_leaks_nothing() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = factory.commit_transaction(|ctx| {
                ctx.new_dynamic_buffer(BufferUse::Uniform, 16, 4)?;
                panic!("loader crashed");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(backend.live_counts().resources(), 0);
    }

    /// One hundred concurrent commits yield one hundred distinct batches
    #[test]
    fn test_concurrent_commits_are_isolated() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (_existing, _scene) = commit_scene(&factory);

        let tokens: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..100u8)
                .map(|i| {
                    let factory = &factory;
                    scope.spawn(move || {
                        factory
                            .commit_transaction(|ctx| {
                                ctx.new_static_buffer(BufferUse::Index, &[i; 8], 4, 2)?;
                                ctx.new_dynamic_texture(4, 4, TextureFormat::I8)?;
                                Ok(())
                            })
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|worker| worker.join().unwrap()).collect()
        });

        let keys: HashSet<_> = tokens.iter().filter_map(GraphicsDataToken::key).collect();
        assert_eq!(keys.len(), 100);
        assert_eq!(factory.live_batches(), 101);
        assert_eq!(backend.live_counts().resources(), 6 + 200);

        drop(tokens);
        assert_eq!(factory.live_batches(), 1);
        assert_eq!(backend.live_counts().resources(), 6);
    }

    /// Concurrent releases and commits do not disturb each other
    #[test]
    fn test_concurrent_release_and_commit() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let doomed: Vec<_> = (0..50).map(|_| commit_scene(&factory).0).collect();

        std::thread::scope(|scope| {
            scope.spawn(|| drop(doomed));
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let (token, _) = commit_scene(&factory);
                        token.release();
                    }
                });
            }
        });

        assert_eq!(factory.live_batches(), 0);
        assert_eq!(backend.live_counts().resources(), 0);
    }

    /// Releasing one token leaves an unrelated batch intact
    #[test]
    fn test_release_only_destroys_own_batch() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (first, first_scene) = commit_scene(&factory);
        let (second, second_scene) = commit_scene(&factory);

        factory.destroy_data(first);

        assert!(!first_scene.vertices.is_alive());
        assert!(!first_scene.binding.is_alive());
        assert_eq!(first_scene.uniforms.size(), None);

        assert!(factory.contains(&second));
        assert_eq!(second_scene.vertices.size(), Some(84));
        assert_eq!(second_scene.target.extent(), Some(Extent2D::new(64, 64)));
        assert!(second_scene.uniforms.load_typed(&[1.0f32; 16]).is_ok());
        assert_eq!(backend.live_counts().resources(), 6);
    }

    /// Released batches wait for the frames that use them
    #[test]
    fn test_release_waits_for_device() {
        let config = GfxConfig::headless().with_completion(CompletionMode::Manual);
        let (backend, factory) = setup(&config);
        let (token, scene) = commit_scene(&factory);

        let mut queue = CommandQueue::new(factory.backend(), 2);
        record_triangle(&mut queue, &scene);
        let generation = queue.submit().unwrap();

        token.release();
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(factory.pending_retirements(), 1);
        assert_eq!(factory.retirement_horizon(), Some(generation));
        assert_eq!(backend.live_counts().resources(), 6);
        assert!(scene.vertices.is_alive());

        // Nothing is freed until the device passes the frame
        assert_eq!(factory.collect_retired(), 0);
        assert_eq!(queue.release_completed(), 0);

        backend.complete_through(generation);
        assert_eq!(factory.collect_retired(), 1);
        assert_eq!(factory.retirement_horizon(), None);
        assert_eq!(queue.release_completed(), 1);
        assert_eq!(backend.live_counts().resources(), 0);
        assert!(!scene.vertices.is_alive());
    }

    /// Teardown waits for the device, frees everything and leaves tokens inert
    #[test]
    fn test_destroy_all_data() {
        let config = GfxConfig::headless().with_completion(CompletionMode::Manual);
        let (backend, factory) = setup(&config);
        let tokens: Vec<_> = (0..3).map(|_| commit_scene(&factory).0).collect();
        let (retiring, scene) = commit_scene(&factory);

        let mut queue = CommandQueue::new(factory.backend(), 2);
        record_triangle(&mut queue, &scene);
        queue.submit().unwrap();
        drop(retiring);
        assert_eq!(factory.pending_retirements(), 1);

        assert_eq!(factory.destroy_all_data(), 3);
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(factory.pending_retirements(), 0);
        assert_eq!(backend.completed_generation().unwrap(), 1);

        // The last frame still holds its objects until the queue lets go
        drop(queue);
        assert_eq!(backend.live_counts().resources(), 0);

        // Releasing after teardown is a no-op
        drop(tokens);
        let (late, _) = commit_scene(&factory);
        assert!(factory.contains(&late));
    }

    /// Registry whose first drain parks until another thread has raced it
    struct GatedRegistry {
        inner: LockedRegistry<HeadlessBackend>,
        gate: Mutex<Option<Arc<Barrier>>>,
    }

    impl Registry<HeadlessBackend> for GatedRegistry {
        fn insert(&self, data: GraphicsData<HeadlessBackend>) -> DataKey {
            self.inner.insert(data)
        }

        fn remove(&self, key: DataKey) -> Option<GraphicsData<HeadlessBackend>> {
            self.inner.remove(key)
        }

        fn drain(&self) -> Vec<GraphicsData<HeadlessBackend>> {
            let drained = self.inner.drain();
            if let Some(gate) = self.gate.lock().unwrap().take() {
                gate.wait();
                std::thread::sleep(Duration::from_millis(100));
            }
            drained
        }

        fn contains(&self, key: DataKey) -> bool {
            self.inner.contains(key)
        }

        fn counts(&self, key: DataKey) -> Option<ResourceCounts> {
            self.inner.counts(key)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    /// Tokens released while teardown drains the registry are treated as destroyed
    #[test]
    fn test_release_during_destroy_all_data() {
        crate::foundation::logging::init_for_tests();
        let config = GfxConfig::headless();
        let backend = HeadlessBackend::new(&config);
        let gate = Arc::new(Barrier::new(3));
        let factory = DataFactory::with_registry(
            Arc::clone(&backend),
            BindingLimits::default(),
            GatedRegistry {
                inner: LockedRegistry::default(),
                gate: Mutex::new(Some(Arc::clone(&gate))),
            },
        );

        let commit = || {
            factory
                .commit_transaction(|ctx| {
                    ctx.new_dynamic_buffer(BufferUse::Uniform, 16, 4)?;
                    Ok(())
                })
                .unwrap()
        };
        let first = commit();
        let second = commit();

        let destroyed = std::thread::scope(|scope| {
            let teardown = scope.spawn(|| factory.destroy_all_data());
            for token in [first, second] {
                let gate = Arc::clone(&gate);
                scope.spawn(move || {
                    gate.wait();
                    token.release();
                });
            }
            teardown.join().unwrap()
        });

        assert_eq!(destroyed, 2);
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(backend.live_counts().resources(), 0);
    }

    /// Tokens may outlive their factory
    #[test]
    fn test_factory_drop_destroys_everything() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (token, scene) = commit_scene(&factory);

        drop(factory);
        assert!(!scene.pipeline.is_alive());
        assert_eq!(backend.live_counts().resources(), 0);
        assert!(!token.is_committed());
        drop(token);
    }

    /// A pipeline rebuilt from emitted blobs accepts the same draws
    #[test]
    fn test_blob_round_trip() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let mut blobs = ShaderBlobs::default();
        let mut source_scene = None;
        let _source = factory
            .commit_transaction(|ctx| {
                source_scene = Some(build_scene(ctx, Some(&mut blobs))?);
                Ok(())
            })
            .unwrap();
        let source_scene = source_scene.unwrap();

        assert!(!blobs.is_empty());
        assert_eq!(&blobs.pipeline[..4], b"HLPC");
        let stored = ShaderBlobs::from_bytes(&blobs.to_bytes()).unwrap();

        let mut rebuilt = None;
        let _blob = factory
            .commit_transaction(|ctx| {
                let pipeline =
                    ctx.new_shader_pipeline_from_blobs(&stored, &source_scene.format, PipelineState::default())?;
                let binding = ctx.new_shader_data_binding(
                    ShaderDataBindingDesc::new(&pipeline)
                        .vertex_format(&source_scene.format)
                        .vertex_buffer(&source_scene.vertices)
                        .uniform(&source_scene.uniforms, ShaderStages::VERTEX),
                )?;
                rebuilt = Some((pipeline, binding));
                Ok(())
            })
            .unwrap();
        let (pipeline, binding) = rebuilt.unwrap();

        assert_eq!(pipeline.reflection(), source_scene.pipeline.reflection());
        assert_eq!(pipeline.vertex_layout(), source_scene.pipeline.vertex_layout());
        assert_eq!(binding.summary(), source_scene.binding.summary());

        let mut queue = CommandQueue::new(factory.backend(), 2);
        for binding in [&source_scene.binding, &binding] {
            queue.set_render_target(&source_scene.target);
            queue.set_shader_data_binding(binding);
            queue.draw(0, 3);
            queue.draw_instances(0, 3, 1);
            queue.submit().unwrap();
        }
        assert_eq!(backend.stats().draws, 4);
    }

    /// Filled caches skip compilation entirely
    #[test]
    fn test_cached_blobs_skip_compilation() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let mut blobs = ShaderBlobs::default();
        let _first = factory
            .commit_transaction(|ctx| build_scene(ctx, Some(&mut blobs)).map(|_| ()))
            .unwrap();

        let cached = blobs.clone();
        let _second = factory
            .commit_transaction(|ctx| {
                let format = ctx.new_vertex_format(&ELEMENTS)?;
                ctx.new_shader_pipeline(
                    ShaderSource::new("not glsl", "not glsl either"),
                    Some(&mut blobs),
                    &format,
                    PipelineState::default(),
                )?;
                Ok(())
            })
            .unwrap();
        assert_eq!(blobs, cached);
    }

    /// A pipeline cache produced for other shaders is rejected
    #[test]
    fn test_foreign_pipeline_cache_rejected() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let mut blobs = ShaderBlobs::default();
        let _first = factory
            .commit_transaction(|ctx| build_scene(ctx, Some(&mut blobs)).map(|_| ()))
            .unwrap();
        let before = backend.live_counts();

        blobs.pipeline = b"HLPC\0\0\0\0\0\0\0\0".to_vec();
        let result = factory.commit_transaction(|ctx| {
            let format = ctx.new_vertex_format(&ELEMENTS)?;
            ctx.new_shader_pipeline_from_blobs(&blobs, &format, PipelineState::default())?;
            Ok(())
        });

        assert!(matches!(result, Err(GfxError::InvalidShaderBlob { .. })));
        assert_eq!(backend.live_counts(), before);
    }

    /// Committing more data on the render thread mid-frame is safe
    #[test]
    fn test_commit_between_record_and_submit() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (_first, scene) = commit_scene(&factory);

        let mut queue = CommandQueue::new(factory.backend(), 2);
        record_triangle(&mut queue, &scene);
        let (second, _) = commit_scene(&factory);
        queue.submit().unwrap();

        assert_eq!(factory.live_batches(), 2);
        assert_eq!(backend.stats().draws, 1);
        drop(second);
    }

    /// Draws past the end of the bound vertex buffer are rejected by the device
    #[test]
    fn test_draw_range_validated() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let (_token, scene) = commit_scene(&factory);

        let mut queue = CommandQueue::new(factory.backend(), 2);
        queue.set_render_target(&scene.target);
        queue.set_shader_data_binding(&scene.binding);
        queue.draw(1, 3);
        assert!(matches!(queue.submit(), Err(GfxError::Backend(_))));
    }

    /// A full frame acquires, submits into the back buffer and presents
    #[test]
    fn test_execute_presents_frame() {
        let (backend, factory) = setup(&GfxConfig::headless());
        let (_token, scene) = commit_scene(&factory);
        let mut surface = WindowSurface::new(
            factory.backend(),
            WindowId(7),
            backend.create_surface(),
            Extent2D::new(64, 64),
            2,
        );

        let mut queue = CommandQueue::new(factory.backend(), 2);
        for frame in 0..4 {
            record_triangle(&mut queue, &scene);
            queue.resolve_bind_texture(&scene.target, Rect2D::new(0, 0, 64, 64), true, true, false);
            queue.resolve_display(&scene.target);
            assert_eq!(queue.execute(&mut surface).unwrap(), frame + 1);
        }

        assert_eq!(surface.presented_frames(), 4);
        assert_eq!(surface.back_buffer_index(), 0);
        let stats = backend.stats();
        assert_eq!((stats.presents, stats.draws, stats.resolves), (4, 4, 8));
        assert_eq!(stats.multisample_resolves, 0);
        assert_eq!(scene.target.samples(), Some(1));
    }

    /// Render textures and pipelines follow the configured sample count and resolves average it
    #[test]
    fn test_multisampled_drawing() {
        let (backend, factory) = setup(&GfxConfig::headless().with_draw_samples(4));
        assert_eq!(factory.draw_samples(), 4);
        let (_token, scene) = commit_scene(&factory);
        assert_eq!(scene.target.samples(), Some(4));

        let mut surface = WindowSurface::new(
            factory.backend(),
            WindowId(8),
            backend.create_surface(),
            Extent2D::new(64, 64),
            2,
        );
        let mut queue = CommandQueue::new(factory.backend(), 2);
        record_triangle(&mut queue, &scene);
        queue.resolve_bind_texture(&scene.target, Rect2D::new(0, 0, 32, 32), false, true, false);
        queue.resolve_display(&scene.target);
        queue.execute(&mut surface).unwrap();

        let stats = backend.stats();
        assert_eq!((stats.draws, stats.resolves, stats.multisample_resolves), (1, 2, 2));
    }

    /// Multisampled render textures cannot keep a sampleable depth copy
    #[test]
    #[should_panic(expected = "depth binding is not available")]
    fn test_multisampled_depth_binding_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless().with_draw_samples(2));
        let _ = factory.commit_transaction(|ctx| {
            ctx.new_render_texture(16, 16, true, true)?;
            Ok(())
        });
    }

    /// The queue never lets more frames run ahead than configured
    #[test]
    fn test_frames_in_flight_throttle() {
        let config = GfxConfig::headless().with_completion(CompletionMode::Manual);
        let (backend, factory) = setup(&config);
        let (_token, scene) = commit_scene(&factory);

        let mut queue = CommandQueue::new(factory.backend(), 2);
        for _ in 0..5 {
            record_triangle(&mut queue, &scene);
            queue.submit().unwrap();
            assert!(queue.pending_frames() <= 2);
        }
        assert_eq!(backend.completed_generation().unwrap(), 3);
    }

    /// Backends that fold vertex formats accept bindings without one
    #[test]
    fn test_folded_vertex_format() {
        let config = GfxConfig::headless().with_folded_vertex_format(true);
        let (_backend, factory) = setup(&config);
        assert!(!factory.binding_needs_vertex_format());

        let _token = factory
            .commit_transaction(|ctx| {
                assert!(!ctx.binding_needs_vertex_format());
                let vertices = ctx.new_static_buffer_typed(BufferUse::Vertex, &TRIANGLE)?;
                let uniforms = ctx.new_static_buffer_typed(BufferUse::Uniform, &[0.0f32; 16])?;
                let format = ctx.new_vertex_format(&ELEMENTS)?;
                let pipeline = ctx.new_shader_pipeline(
                    ShaderSource::new(VERTEX_SOURCE, FRAGMENT_SOURCE),
                    None,
                    &format,
                    PipelineState::default(),
                )?;
                let binding = ctx.new_shader_data_binding(
                    ShaderDataBindingDesc::new(&pipeline)
                        .vertex_buffer(&vertices)
                        .uniform(&uniforms, ShaderStages::VERTEX | ShaderStages::FRAGMENT),
                )?;
                assert_eq!(binding.summary().map(|s| s.has_vertex_format), Some(false));
                Ok(())
            })
            .unwrap();
    }

    /// The local registry drives the same lifecycle on one thread
    #[test]
    fn test_local_registry_factory() {
        let config = GfxConfig::headless();
        let backend = HeadlessBackend::new(&config);
        let factory = DataFactory::with_registry(
            Arc::clone(&backend),
            BindingLimits::default(),
            LocalRegistry::default(),
        );

        let token = factory
            .commit_transaction(|ctx| {
                ctx.new_static_array_texture(2, 2, 3, TextureFormat::Rgba8, &[0; 48])?;
                ctx.new_static_texture(4, 4, 3, TextureFormat::I8, &[0; 21])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(token.counts().map(|c| c.textures), Some(2));
        assert_eq!(backend.live_counts().textures, 2);

        token.release();
        assert_eq!(factory.live_batches(), 0);
        assert_eq!(backend.live_counts().textures, 0);
    }

    /// Static buffer payloads must match stride times count
    #[test]
    #[should_panic(expected = "stride * count")]
    fn test_buffer_payload_mismatch_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            ctx.new_static_buffer(BufferUse::Vertex, &[0; 10], 4, 3)?;
            Ok(())
        });
    }

    /// Buffer sizes that overflow are rejected before any payload check
    #[test]
    #[should_panic(expected = "overflows the address space")]
    fn test_buffer_size_overflow_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            ctx.new_static_buffer(BufferUse::Vertex, &[], 1 << (usize::BITS - 1), 2)?;
            Ok(())
        });
    }

    /// Dynamic buffers reject overflowing sizes too
    #[test]
    #[should_panic(expected = "overflows the address space")]
    fn test_dynamic_buffer_size_overflow_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            ctx.new_dynamic_buffer(BufferUse::Uniform, usize::MAX, 2)?;
            Ok(())
        });
    }

    /// Mip chains longer than the image allows are rejected
    #[test]
    #[should_panic(expected = "mip levels is out of range")]
    fn test_excess_mips_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            ctx.new_static_texture(4, 4, 4, TextureFormat::I8, &[0; 22])?;
            Ok(())
        });
    }

    /// Binding more uniforms than the layout has slots is rejected
    #[test]
    #[should_panic(expected = "uniform slots requested")]
    fn test_uniform_slot_overflow_panics() {
        let config = GfxConfig::headless().with_binding_limits(BindingLimits {
            uniform_slots: 1,
            texture_slots: 1,
        });
        let (_backend, factory) = setup(&config);
        let _ = factory.commit_transaction(|ctx| {
            let scene = build_scene(ctx, None)?;
            ctx.new_shader_data_binding(
                ShaderDataBindingDesc::new(&scene.pipeline)
                    .vertex_format(&scene.format)
                    .uniform(&scene.uniforms, ShaderStages::VERTEX)
                    .uniform(&scene.uniforms, ShaderStages::FRAGMENT),
            )?;
            Ok(())
        });
    }

    /// Sampling a render texture requires a binding enabled at creation
    #[test]
    #[should_panic(expected = "without a shader binding enabled")]
    fn test_unbindable_render_texture_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            let scene = build_scene(ctx, None)?;
            let offscreen = ctx.new_render_texture(32, 32, false, false)?;
            ctx.new_shader_data_binding(
                ShaderDataBindingDesc::new(&scene.pipeline)
                    .vertex_format(&scene.format)
                    .texture(&offscreen),
            )?;
            Ok(())
        });
    }

    /// Backends that need vertex formats reject bindings without one
    #[test]
    #[should_panic(expected = "need an explicit vertex format")]
    fn test_missing_vertex_format_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            let scene = build_scene(ctx, None)?;
            ctx.new_shader_data_binding(ShaderDataBindingDesc::new(&scene.pipeline))?;
            Ok(())
        });
    }

    /// A vertex format missing a location the shader reads is rejected
    #[test]
    #[should_panic(expected = "reads location 1")]
    fn test_vertex_interface_mismatch_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let _ = factory.commit_transaction(|ctx| {
            let format = ctx.new_vertex_format(&ELEMENTS[..1])?;
            ctx.new_shader_pipeline(
                ShaderSource::new(VERTEX_SOURCE, FRAGMENT_SOURCE),
                None,
                &format,
                PipelineState::default(),
            )?;
            Ok(())
        });
    }

    /// Handles of a destroyed batch cannot be used
    #[test]
    #[should_panic(expected = "used after its graphics data was destroyed")]
    fn test_use_after_release_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let (token, scene) = commit_scene(&factory);
        token.release();
        let _ = scene.uniforms.load(&[0; 4]);
    }

    /// Draws need a data binding
    #[test]
    #[should_panic(expected = "without a shader data binding")]
    fn test_draw_without_binding_panics() {
        let (_backend, factory) = setup(&GfxConfig::headless());
        let (_token, scene) = commit_scene(&factory);
        let mut queue = CommandQueue::new(factory.backend(), 2);
        queue.set_render_target(&scene.target);
        queue.draw(0, 3);
    }
}
