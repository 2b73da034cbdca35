//! Source image acquisition.
//!
//! A [`SourceLoader`] turns an [`ImageSource`] into a decoded bitmap. Decodes
//! that are still running are represented by a [`PendingImage`], the receiving
//! half of a single-shot channel whose sending half ([`ImageCompleter`]) lives
//! with whoever produces the pixels. Each subscription captures the loader's
//! generation; a completion observed under a different generation is stale and
//! dropped.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use image::RgbaImage;
use imagesource::{SourceClient, SourceRef};
use tracing::{debug, warn};

use crate::error::WarpError;

/// Decoded RGBA pixels shared between the loader and whoever supplied them.
pub type Bitmap = Arc<RgbaImage>;

type DecodeResult = Result<Bitmap, String>;

/// Sending half of a pending decode.
#[derive(Debug)]
pub struct ImageCompleter {
    sender: Sender<DecodeResult>,
}

impl ImageCompleter {
    /// Delivers the decode result. Returns `false` when nobody is listening
    /// anymore, in which case the result is discarded.
    pub fn complete(self, result: Result<Bitmap, String>) -> bool {
        self.sender.send(result).is_ok()
    }

    pub fn succeed(self, image: RgbaImage) -> bool {
        self.complete(Ok(Arc::new(image)))
    }

    pub fn fail(self, reason: impl Into<String>) -> bool {
        self.complete(Err(reason.into()))
    }
}

/// Receiving half of a pending decode.
#[derive(Debug, Clone)]
pub struct PendingImage {
    receiver: Receiver<DecodeResult>,
}

impl PendingImage {
    fn try_take(&self) -> Result<DecodeResult, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Creates a connected completer/pending pair.
pub fn pending_image() -> (ImageCompleter, PendingImage) {
    let (sender, receiver) = bounded(1);
    (ImageCompleter { sender }, PendingImage { receiver })
}

/// The authoritative raw image reference of an instance.
#[derive(Clone)]
pub enum ImageSource {
    Bitmap(Bitmap),
    Decoding(PendingImage),
    Url(String),
}

impl ImageSource {
    pub fn label(&self) -> String {
        match self {
            ImageSource::Bitmap(bitmap) => {
                format!("<bitmap {}x{}>", bitmap.width(), bitmap.height())
            }
            ImageSource::Decoding(_) => "<decoding bitmap>".to_string(),
            ImageSource::Url(url) => url.clone(),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<RgbaImage> for ImageSource {
    fn from(value: RgbaImage) -> Self {
        ImageSource::Bitmap(Arc::new(value))
    }
}

impl From<Bitmap> for ImageSource {
    fn from(value: Bitmap) -> Self {
        ImageSource::Bitmap(value)
    }
}

impl From<PendingImage> for ImageSource {
    fn from(value: PendingImage) -> Self {
        ImageSource::Decoding(value)
    }
}

/// Starts an asynchronous fetch + decode for a URL.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> PendingImage;
}

/// Fetches on a worker thread per request using a blocking HTTP/file client.
#[derive(Debug, Clone)]
pub struct ThreadedFetcher {
    client: Arc<SourceClient>,
    base_dir: Option<std::path::PathBuf>,
}

impl ThreadedFetcher {
    pub fn new(client: SourceClient) -> Self {
        Self {
            client: Arc::new(client),
            base_dir: None,
        }
    }

    /// Relative local paths are resolved against `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<std::path::PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }
}

impl ImageFetcher for ThreadedFetcher {
    fn fetch(&self, url: &str) -> PendingImage {
        let (completer, pending) = pending_image();
        let source = match SourceRef::from_input(url) {
            Ok(source) => match &self.base_dir {
                Some(base) => source.resolve_against(base),
                None => source,
            },
            Err(err) => {
                completer.fail(err.to_string());
                return pending;
            }
        };

        let client = Arc::clone(&self.client);
        let label = url.to_string();
        let spawned = thread::Builder::new()
            .name("geowarp-fetch".into())
            .spawn(move || {
                let result = client
                    .load(&source)
                    .map(Arc::new)
                    .map_err(|err| err.to_string());
                if !completer.complete(result) {
                    debug!(src = %label, "fetch finished after its request was cancelled");
                }
            });
        if let Err(err) = spawned {
            warn!(src = %url, error = %err, "failed to spawn fetch worker");
        }
        pending
    }
}

/// Result of asking a loader to start (or continue) a load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Ready,
    Pending,
    NoSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Ready { width: u32, height: u32 },
    Failed(WarpError),
}

#[derive(Debug)]
struct InFlight {
    token: u64,
    pending: PendingImage,
}

/// Resolves an [`ImageSource`] into a decoded bitmap, once per load cycle.
#[derive(Debug, Default)]
pub struct SourceLoader {
    source: Option<ImageSource>,
    decoded: Option<Bitmap>,
    generation: u64,
    epoch: u64,
    in_flight: Option<InFlight>,
    ready_transitions: usize,
    fetches: usize,
}

impl SourceLoader {
    pub fn new(source: Option<ImageSource>) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn source(&self) -> Option<&ImageSource> {
        self.source.as_ref()
    }

    pub fn label(&self) -> String {
        self.source
            .as_ref()
            .map(ImageSource::label)
            .unwrap_or_else(|| "<none>".to_string())
    }

    /// Replaces the authoritative source and cancels any outstanding load.
    pub fn set_source(&mut self, source: ImageSource) {
        self.cancel();
        self.source = Some(source);
        self.decoded = None;
        self.epoch += 1;
    }

    /// Drops the in-flight subscription. A decoded bitmap is kept.
    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(token = in_flight.token, "cancelled in-flight source load");
        }
        self.generation += 1;
    }

    /// Starts a load cycle, or reports the state of the current one.
    pub fn request_load(&mut self, fetcher: &dyn ImageFetcher) -> Result<LoadStatus, WarpError> {
        if self.decoded.is_some() {
            return Ok(LoadStatus::Ready);
        }
        if self.in_flight.is_some() {
            return Ok(LoadStatus::Pending);
        }

        let pending = match &self.source {
            None => return Ok(LoadStatus::NoSource),
            Some(ImageSource::Bitmap(bitmap)) => {
                let bitmap = Arc::clone(bitmap);
                self.accept(bitmap)?;
                return Ok(LoadStatus::Ready);
            }
            Some(ImageSource::Decoding(pending)) => pending.clone(),
            Some(ImageSource::Url(url)) => {
                self.fetches += 1;
                debug!(src = %url, "requesting image fetch");
                fetcher.fetch(url)
            }
        };

        self.in_flight = Some(InFlight {
            token: self.generation,
            pending,
        });

        // The decode may already have finished before we subscribed.
        match self.poll() {
            Some(SourceEvent::Ready { .. }) => Ok(LoadStatus::Ready),
            Some(SourceEvent::Failed(err)) => Err(err),
            None => Ok(LoadStatus::Pending),
        }
    }

    /// Observes the in-flight decode, if any.
    pub fn poll(&mut self) -> Option<SourceEvent> {
        let outcome = self.in_flight.as_ref()?.pending.try_take();
        let result = match outcome {
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err("image producer went away before completing".to_string()),
            Ok(result) => result,
        };

        let in_flight = self.in_flight.take()?;
        if in_flight.token != self.generation {
            debug!(
                token = in_flight.token,
                generation = self.generation,
                "discarding stale decode"
            );
            return None;
        }

        match result {
            Ok(bitmap) => match self.accept(bitmap) {
                Ok((width, height)) => Some(SourceEvent::Ready { width, height }),
                Err(err) => Some(SourceEvent::Failed(err)),
            },
            Err(reason) => Some(SourceEvent::Failed(WarpError::SourceDecodeFailure {
                src: self.label(),
                reason,
            })),
        }
    }

    fn accept(&mut self, bitmap: Bitmap) -> Result<(u32, u32), WarpError> {
        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return Err(WarpError::EmptySource);
        }
        self.decoded = Some(bitmap);
        self.ready_transitions += 1;
        debug!(src = %self.label(), width, height, "source ready");
        Ok((width, height))
    }

    pub fn is_ready(&self) -> bool {
        self.decoded.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.decoded.as_ref()
    }

    /// Natural pixel size of the decoded source.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.decoded.as_ref().map(|bitmap| bitmap.dimensions())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumped whenever the source is replaced.
    pub fn source_epoch(&self) -> u64 {
        self.epoch
    }

    pub fn ready_transitions(&self) -> usize {
        self.ready_transitions
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}
