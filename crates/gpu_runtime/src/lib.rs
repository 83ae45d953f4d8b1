//! wgpu implementations of the atlas collaborator traits.
//!
//! [`WgpuImages`] owns source textures; [`WgpuBlitter`] records page blits into a
//! command encoder that the host submits with the rest of its frame.

mod blitter;
mod images;

pub use blitter::{PAGE_FORMAT, PageSurface, WgpuBlitter};
pub use images::{ImageHandle, UploadError, WgpuImages};

#[cfg(feature = "blocking")]
pub use headless::{HeadlessDeviceError, request_headless_device};

#[cfg(feature = "blocking")]
mod headless {
    use std::fmt;

    #[derive(Debug)]
    pub enum HeadlessDeviceError {
        Adapter(wgpu::RequestAdapterError),
        Device(wgpu::RequestDeviceError),
    }

    impl fmt::Display for HeadlessDeviceError {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                HeadlessDeviceError::Adapter(error) => {
                    write!(formatter, "no compatible adapter: {error}")
                }
                HeadlessDeviceError::Device(error) => {
                    write!(formatter, "device request failed: {error}")
                }
            }
        }
    }

    impl std::error::Error for HeadlessDeviceError {}

    /// Blocks on adapter and device creation without a presentation surface.
    pub fn request_headless_device(
        label: &str,
    ) -> Result<(wgpu::Device, wgpu::Queue), HeadlessDeviceError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(HeadlessDeviceError::Adapter)?;
            adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some(label),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(HeadlessDeviceError::Device)
        })
    }
}

#[cfg(test)]
mod wgsl_tests;
