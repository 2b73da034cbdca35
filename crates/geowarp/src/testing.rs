use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::device::{PassCompletion, PassSignal, WarpDevice, WarpPass};
use crate::error::WarpError;
use crate::source::{pending_image, Bitmap, ImageCompleter, ImageFetcher, PendingImage};
use crate::types::{Corners, LonLat};

pub fn solid_bitmap(width: u32, height: u32) -> Bitmap {
    Arc::new(RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255])))
}

pub fn test_corners() -> Corners {
    [
        LonLat::new(10.0, 10.0),
        LonLat::new(11.0, 10.0),
        LonLat::new(11.0, 9.0),
        LonLat::new(10.0, 9.0),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeTexture {
    id: u64,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeBuffer {
    id: u64,
    len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub source_id: u64,
    pub target_id: u64,
    pub corners_id: u64,
    pub source_size: (u32, u32),
    pub target_size: (u32, u32),
    pub viewport: (u32, u32),
    pub clear: [f64; 4],
    pub extent_params: [f32; 4],
    pub index_count: u32,
    pub corner_vertices: usize,
}

/// In-memory device that records draws instead of touching a GPU.
#[derive(Debug)]
pub struct RecordingDevice {
    max_dimension: u32,
    hold_passes: bool,
    fail_uploads: Cell<bool>,
    next_id: Cell<u64>,
    uploads: Cell<usize>,
    render_targets: Cell<usize>,
    draws: RefCell<Vec<DrawRecord>>,
    held: RefCell<Vec<PassSignal>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            max_dimension: 8192,
            hold_passes: false,
            fail_uploads: Cell::new(false),
            next_id: Cell::new(1),
            uploads: Cell::new(0),
            render_targets: Cell::new(0),
            draws: RefCell::new(Vec::new()),
            held: RefCell::new(Vec::new()),
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Passes stay pending until `release_passes`.
    pub fn holding_passes(mut self) -> Self {
        self.hold_passes = true;
        self
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.set(fail);
    }

    pub fn release_passes(&self) {
        for signal in self.held.borrow_mut().drain(..) {
            signal.complete();
        }
    }

    pub fn drop_passes(&self) {
        self.held.borrow_mut().clear();
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.draws.borrow().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.get()
    }

    pub fn render_target_count(&self) -> usize {
        self.render_targets.get()
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl WarpDevice for RecordingDevice {
    type Texture = FakeTexture;
    type Buffer = FakeBuffer;
    type Program = ();

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_program(&self) -> Result<Self::Program, WarpError> {
        Ok(())
    }

    fn create_vertex_buffer(
        &self,
        _label: &str,
        data: &[[f32; 2]],
    ) -> Result<Self::Buffer, WarpError> {
        Ok(FakeBuffer {
            id: self.next_id(),
            len: data.len(),
        })
    }

    fn create_index_buffer(&self, _label: &str, data: &[u32]) -> Result<Self::Buffer, WarpError> {
        Ok(FakeBuffer {
            id: self.next_id(),
            len: data.len(),
        })
    }

    fn upload_texture(&self, image: &RgbaImage) -> Result<Self::Texture, WarpError> {
        if self.fail_uploads.get() {
            return Err(WarpError::ResourceExhaustion(
                "simulated texture allocation failure".into(),
            ));
        }
        self.uploads.set(self.uploads.get() + 1);
        Ok(FakeTexture {
            id: self.next_id(),
            width: image.width(),
            height: image.height(),
        })
    }

    fn create_render_target(&self, width: u32, height: u32) -> Result<Self::Texture, WarpError> {
        self.render_targets.set(self.render_targets.get() + 1);
        Ok(FakeTexture {
            id: self.next_id(),
            width,
            height,
        })
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn draw_warp(&self, pass: &WarpPass<'_, Self>) -> Result<PassCompletion, WarpError> {
        self.draws.borrow_mut().push(DrawRecord {
            source_id: pass.source.id,
            target_id: pass.target.id,
            corners_id: pass.corners.id,
            source_size: (pass.source.width, pass.source.height),
            target_size: (pass.target.width, pass.target.height),
            viewport: pass.viewport,
            clear: pass.clear,
            extent_params: pass.extent_params,
            index_count: pass.index_count,
            corner_vertices: pass.corners.len,
        });
        if self.hold_passes {
            let (signal, completion) = PassCompletion::channel();
            self.held.borrow_mut().push(signal);
            Ok(completion)
        } else {
            Ok(PassCompletion::completed())
        }
    }

    fn maintain(&self) {}
}

#[derive(Default)]
struct FetchLog {
    waiting: Vec<(String, ImageCompleter)>,
    requested: Vec<String>,
}

/// Fetcher whose requests are completed by the test.
#[derive(Clone, Default)]
pub struct ManualFetcher {
    log: Rc<RefCell<FetchLog>>,
}

impl ManualFetcher {
    pub fn request_count(&self) -> usize {
        self.log.borrow().requested.len()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.log
            .borrow()
            .requested
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }

    fn take(&self, url: &str) -> Option<ImageCompleter> {
        let mut log = self.log.borrow_mut();
        let index = log.waiting.iter().rposition(|(waiting, _)| waiting == url)?;
        Some(log.waiting.remove(index).1)
    }

    /// Delivers a decoded image; `false` when the request was cancelled.
    pub fn complete(&self, url: &str, width: u32, height: u32) -> bool {
        match self.take(url) {
            Some(completer) => completer.complete(Ok(solid_bitmap(width, height))),
            None => false,
        }
    }

    pub fn fail(&self, url: &str, reason: &str) -> bool {
        match self.take(url) {
            Some(completer) => completer.fail(reason),
            None => false,
        }
    }
}

impl ImageFetcher for ManualFetcher {
    fn fetch(&self, url: &str) -> PendingImage {
        let (completer, pending) = pending_image();
        let mut log = self.log.borrow_mut();
        log.waiting.push((url.to_string(), completer));
        log.requested.push(url.to_string());
        pending
    }
}
