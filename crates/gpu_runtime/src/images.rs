use std::collections::HashMap;
use std::fmt;

use atlas::{ImageProvider, Rgba};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(u64);

impl ImageHandle {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadError {
    UnknownHandle(ImageHandle),
    ZeroSize,
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for UploadError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::UnknownHandle(handle) => {
                write!(formatter, "image handle {} is not registered", handle.0)
            }
            UploadError::ZeroSize => write!(formatter, "image size must be non-zero"),
            UploadError::SizeMismatch { expected, actual } => write!(
                formatter,
                "rgba8 upload expected {expected} bytes, got {actual}"
            ),
        }
    }
}

impl std::error::Error for UploadError {}

#[derive(Debug)]
struct StoredImage {
    width: u32,
    height: u32,
    /// `None` until pixels have been uploaded.
    texture: Option<(wgpu::Texture, wgpu::TextureView)>,
}

/// Source images stored as sampled `Rgba8Unorm` textures.
#[derive(Debug)]
pub struct WgpuImages {
    device: wgpu::Device,
    queue: wgpu::Queue,
    images: HashMap<ImageHandle, StoredImage>,
    next_handle: u64,
}

impl WgpuImages {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            images: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Registers an image whose pixels arrive later through [`Self::upload_rgba8`].
    pub fn register_pending(&mut self, width: u32, height: u32) -> Result<ImageHandle, UploadError> {
        if width == 0 || height == 0 {
            return Err(UploadError::ZeroSize);
        }
        let handle = ImageHandle(self.next_handle);
        self.next_handle += 1;
        self.images.insert(
            handle,
            StoredImage {
                width,
                height,
                texture: None,
            },
        );
        Ok(handle)
    }

    pub fn upload_rgba8(&mut self, handle: ImageHandle, pixels: &[u8]) -> Result<(), UploadError> {
        let image = self
            .images
            .get_mut(&handle)
            .ok_or(UploadError::UnknownHandle(handle))?;
        let expected = image.width as usize * image.height as usize * 4;
        if pixels.len() != expected {
            return Err(UploadError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let size = wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("atlas.source_image"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(image.width * 4),
                rows_per_image: Some(image.height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        image.texture = Some((texture, view));
        Ok(())
    }

    pub fn insert_rgba8(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<ImageHandle, UploadError> {
        let handle = self.register_pending(width, height)?;
        if let Err(error) = self.upload_rgba8(handle, pixels) {
            self.images.remove(&handle);
            return Err(error);
        }
        Ok(handle)
    }

    pub fn insert_colors(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[Rgba],
    ) -> Result<ImageHandle, UploadError> {
        let texels: Vec<[u8; 4]> = pixels.iter().map(|color| color.0).collect();
        self.insert_rgba8(width, height, bytemuck::cast_slice(&texels))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageProvider for WgpuImages {
    type Handle = ImageHandle;
    type GpuSource = wgpu::TextureView;

    fn is_ready(&self, handle: &ImageHandle) -> bool {
        self.images
            .get(handle)
            .is_some_and(|image| image.texture.is_some())
    }

    fn pixel_size(&self, handle: &ImageHandle) -> (u32, u32) {
        self.images
            .get(handle)
            .map_or((0, 0), |image| (image.width, image.height))
    }

    fn bind_for_blit(&self, handle: &ImageHandle) -> Option<wgpu::TextureView> {
        let image = self.images.get(handle)?;
        image.texture.as_ref().map(|(_, view)| view.clone())
    }

    fn solid_color(&mut self, color: Rgba) -> ImageHandle {
        self.insert_rgba8(1, 1, &color.0)
            .expect("1x1 rgba8 upload has a fixed valid size")
    }

    /// Drops the texture without destroying it: blits that sample it may still sit in an
    /// encoder the host has not submitted yet, and wgpu keeps it alive until they retire.
    fn release(&mut self, handle: ImageHandle) {
        if self.images.remove(&handle).is_none() {
            debug!("release of unknown image handle {}", handle.0);
        }
    }
}
