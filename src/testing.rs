//! In-memory stand-ins for the GPU seams, shared by the unit tests.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
    sync::Arc,
};

use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};

use crate::{
    error::StatsError,
    gpu::{BufferMapState, TimestampDevice},
    raster::{
        ColorTarget, FramebufferBindings, FramebufferHandle, QueryHandle, RasterContext,
        TextureHandle,
    },
};

/// RGBA8 pixels, bottom row first like a GL framebuffer.
#[derive(Debug, Clone)]
pub struct FakeImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FakeImage {
    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

#[derive(Debug, Default)]
pub struct FakeRasterState {
    pub supports_queries: bool,
    pub disjoint: bool,
    pub ended: usize,
    pub blits: usize,
    pub fail_readback: bool,
    pub fail_query_creation: bool,
    pub fail_target_creation: bool,
    pub bindings: FramebufferBindings,
    pub framebuffers: HashMap<FramebufferHandle, FakeImage>,
    pub targets_created: usize,
    pub targets_deleted: usize,
    queries: HashMap<QueryHandle, Option<u64>>,
    next_id: u32,
}

impl FakeRasterState {
    /// Make every live query report `ns` elapsed.
    pub fn finish_all(&mut self, ns: u64) {
        for result in self.queries.values_mut() {
            *result = Some(ns);
        }
    }

    pub fn live_queries(&self) -> usize {
        self.queries.len()
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Register a framebuffer whose pixel at `(x, y)` (y up) is `color(x, y)`.
    pub fn add_source(
        &mut self,
        width: u32,
        height: u32,
        color: impl Fn(u32, u32) -> [u8; 4],
    ) -> FramebufferHandle {
        let handle = FramebufferHandle(self.next_id());
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&color(x, y));
            }
        }
        self.framebuffers.insert(
            handle,
            FakeImage {
                width,
                height,
                pixels,
            },
        );
        handle
    }
}

pub struct FakeRaster {
    state: Rc<RefCell<FakeRasterState>>,
}

impl FakeRaster {
    pub fn new() -> (Self, Rc<RefCell<FakeRasterState>>) {
        let state = Rc::new(RefCell::new(FakeRasterState {
            supports_queries: true,
            ..Default::default()
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl RasterContext for FakeRaster {
    fn supports_timer_queries(&self) -> bool {
        self.state.borrow().supports_queries
    }

    fn create_timer_query(&mut self) -> Result<QueryHandle, StatsError> {
        let mut state = self.state.borrow_mut();
        if state.fail_query_creation {
            return Err(StatsError::QueryCreation("out of query objects".into()));
        }
        let query = QueryHandle(state.next_id());
        state.queries.insert(query, None);
        Ok(query)
    }

    fn begin_time_elapsed(&mut self, _query: QueryHandle) {}

    fn end_time_elapsed(&mut self) {
        self.state.borrow_mut().ended += 1;
    }

    fn query_result_available(&mut self, query: QueryHandle) -> bool {
        self.state
            .borrow()
            .queries
            .get(&query)
            .is_some_and(|r| r.is_some())
    }

    fn query_result_ns(&mut self, query: QueryHandle) -> u64 {
        self.state
            .borrow()
            .queries
            .get(&query)
            .copied()
            .flatten()
            .unwrap_or(0)
    }

    fn gpu_disjoint(&mut self) -> bool {
        self.state.borrow().disjoint
    }

    fn delete_query(&mut self, query: QueryHandle) {
        self.state.borrow_mut().queries.remove(&query);
    }

    fn framebuffer_bindings(&self) -> FramebufferBindings {
        self.state.borrow().bindings
    }

    fn bind_read_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.borrow_mut().bindings.read = framebuffer;
    }

    fn bind_draw_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.state.borrow_mut().bindings.draw = framebuffer;
    }

    fn create_color_target(&mut self, width: u32, height: u32) -> Result<ColorTarget, StatsError> {
        let mut state = self.state.borrow_mut();
        if state.fail_target_creation {
            return Err(StatsError::ResourceCreation {
                what: "preview framebuffer",
                reason: "incomplete attachment".into(),
            });
        }
        let id = state.next_id();
        let framebuffer = FramebufferHandle(id);
        state.framebuffers.insert(
            framebuffer,
            FakeImage {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
            },
        );
        state.targets_created += 1;
        Ok(ColorTarget {
            framebuffer,
            texture: TextureHandle(id),
            width,
            height,
        })
    }

    fn delete_color_target(&mut self, target: ColorTarget) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&target.framebuffer);
        state.targets_deleted += 1;
    }

    fn blit_linear(&mut self, src: (u32, u32), dst: (u32, u32)) {
        let mut state = self.state.borrow_mut();
        state.blits += 1;
        let (Some(read), Some(draw)) = (state.bindings.read, state.bindings.draw) else {
            return;
        };
        let Some(source) = state.framebuffers.get(&read).cloned() else {
            return;
        };
        let Some(target) = state.framebuffers.get_mut(&draw) else {
            return;
        };
        for y in 0..dst.1.min(target.height) {
            for x in 0..dst.0.min(target.width) {
                let sx = (x * src.0 / dst.0).min(source.width - 1);
                let sy = (y * src.1 / dst.1).min(source.height - 1);
                let i = ((y * target.width + x) * 4) as usize;
                target.pixels[i..i + 4].copy_from_slice(&source.pixel(sx, sy));
            }
        }
    }

    fn read_rgba(&mut self, width: u32, height: u32, out: &mut [u8]) -> Result<(), StatsError> {
        let state = self.state.borrow();
        if state.fail_readback {
            return Err(StatsError::PixelReadback("context lost".into()));
        }
        let image = state
            .bindings
            .read
            .and_then(|fb| state.framebuffers.get(&fb))
            .ok_or(StatsError::ResourcesUnavailable)?;
        let len = (width * height * 4) as usize;
        out[..len].copy_from_slice(&image.pixels[..len]);
        Ok(())
    }
}

type TimestampReply = oneshot::Sender<Result<[u64; 2], StatsError>>;

#[derive(Debug)]
pub struct FakeTimestampsState {
    pub states: [BufferMapState; 2],
    pub recorded: Vec<usize>,
    pub reads: Vec<usize>,
    /// Map state of each buffer at the moment it was read
    pub read_states: Vec<BufferMapState>,
    /// Answer reads immediately instead of waiting for `complete_next`
    pub auto_reply: Option<[u64; 2]>,
    pub period_ns: f32,
    pub polls: usize,
    pub releases: usize,
    replies: VecDeque<(usize, TimestampReply)>,
}

impl FakeTimestampsState {
    /// Finish the oldest outstanding read with `result`.
    pub fn complete_next(&mut self, result: Result<[u64; 2], StatsError>) {
        if let Some((slot, reply)) = self.replies.pop_front() {
            self.states[slot] = BufferMapState::Unmapped;
            let _ = reply.send(result);
        }
    }
}

pub struct FakeTimestamps {
    state: Rc<RefCell<FakeTimestampsState>>,
}

impl FakeTimestamps {
    pub fn new() -> (Self, Rc<RefCell<FakeTimestampsState>>) {
        let state = Rc::new(RefCell::new(FakeTimestampsState {
            states: [BufferMapState::Unmapped; 2],
            recorded: Vec::new(),
            reads: Vec::new(),
            read_states: Vec::new(),
            auto_reply: None,
            period_ns: 1.0,
            polls: 0,
            releases: 0,
            replies: VecDeque::new(),
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl TimestampDevice for FakeTimestamps {
    fn read_buffer_state(&self, slot: usize) -> BufferMapState {
        self.state.borrow().states[slot]
    }

    fn record_resolve(
        &mut self,
        _encoder: &mut dyn std::any::Any,
        slot: usize,
    ) -> Result<(), StatsError> {
        self.state.borrow_mut().recorded.push(slot);
        Ok(())
    }

    fn read_timestamps(
        &mut self,
        slot: usize,
    ) -> LocalBoxFuture<'static, Result<[u64; 2], StatsError>> {
        let mut state = self.state.borrow_mut();
        state.reads.push(slot);
        let map_state = state.states[slot];
        state.read_states.push(map_state);
        if let Some(reply) = state.auto_reply {
            return futures::future::ready(Ok(reply)).boxed_local();
        }
        state.states[slot] = BufferMapState::Pending;
        let (tx, rx) = oneshot::channel();
        state.replies.push_back((slot, tx));
        async move { rx.await.unwrap_or(Err(StatsError::MapCancelled)) }.boxed_local()
    }

    fn timestamp_period_ns(&self) -> f32 {
        self.state.borrow().period_ns
    }

    fn poll(&self) {
        self.state.borrow_mut().polls += 1;
    }

    fn release(&mut self) {
        self.state.borrow_mut().releases += 1;
    }
}

/// Real wgpu device for tests that need one, or `None` on headless machines.
pub fn wgpu_device() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter =
        pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
    let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("frame_stats_test_device"),
            required_features,
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::Performance,
        },
        None,
    ))
    .ok()?;
    Some((Arc::new(device), Arc::new(queue)))
}
