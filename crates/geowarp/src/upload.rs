use tracing::debug;

use crate::device::WarpDevice;
use crate::error::WarpError;
use crate::source::SourceLoader;

/// GPU copy of an instance's decoded source, uploaded once per source.
#[derive(Debug)]
pub struct SourceTexture<T> {
    texture: Option<T>,
    epoch: Option<u64>,
    uploads: usize,
}

impl<T> Default for SourceTexture<T> {
    fn default() -> Self {
        Self {
            texture: None,
            epoch: None,
            uploads: 0,
        }
    }
}

impl<T> SourceTexture<T> {
    /// Uploads the loader's bitmap unless the current source is already on the GPU.
    pub fn ensure<D>(&mut self, device: &D, loader: &SourceLoader) -> Result<&T, WarpError>
    where
        D: WarpDevice<Texture = T> + ?Sized,
    {
        let epoch = loader.source_epoch();
        if self.epoch != Some(epoch) || self.texture.is_none() {
            let bitmap = loader
                .bitmap()
                .ok_or(WarpError::NotReady("source bitmap has not been decoded"))?;
            let (width, height) = bitmap.dimensions();
            if width == 0 || height == 0 {
                return Err(WarpError::EmptySource);
            }
            let max = device.max_texture_dimension();
            if width > max || height > max {
                return Err(WarpError::ResourceExhaustion(format!(
                    "source is {width}x{height}, device limit is {max}"
                )));
            }

            self.texture = None;
            self.epoch = None;
            let texture = device.upload_texture(bitmap)?;
            self.texture = Some(texture);
            self.epoch = Some(epoch);
            self.uploads += 1;
            debug!(width, height, uploads = self.uploads, "uploaded source texture");
        }

        self.texture
            .as_ref()
            .ok_or(WarpError::NotReady("source texture missing after upload"))
    }

    /// Forgets the uploaded texture; the next `ensure` uploads again.
    pub fn invalidate(&mut self) {
        self.texture = None;
        self.epoch = None;
    }

    pub fn is_created(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<&T> {
        self.texture.as_ref()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads
    }
}
