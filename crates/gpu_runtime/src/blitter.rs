use atlas::{BlitError, BlitExecutor, BlitMode, PageId, PixelRect, SurfaceDescriptor};
use log::debug;

pub const PAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU texture backing one atlas page.
#[derive(Debug)]
pub struct PageSurface {
    page: PageId,
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl PageSurface {
    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Records blits as render passes into one command encoder per batch.
#[derive(Debug)]
pub struct WgpuBlitter {
    device: wgpu::Device,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    identity_pipeline: wgpu::RenderPipeline,
    gamma_to_linear_pipeline: wgpu::RenderPipeline,
    linear_to_gamma_pipeline: wgpu::RenderPipeline,
    encoder: Option<wgpu::CommandEncoder>,
    blits_recorded: u32,
}

impl WgpuBlitter {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("atlas.blit.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("atlas.blit.bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("atlas.blit.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let create_pipeline = |label: &str, fragment_entry: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fragment_entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: PAGE_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        };
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("atlas.blit.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });
        Self {
            identity_pipeline: create_pipeline("atlas.blit.identity", "fs_identity"),
            gamma_to_linear_pipeline: create_pipeline(
                "atlas.blit.gamma_to_linear",
                "fs_gamma_to_linear",
            ),
            linear_to_gamma_pipeline: create_pipeline(
                "atlas.blit.linear_to_gamma",
                "fs_linear_to_gamma",
            ),
            device: device.clone(),
            bind_group_layout,
            sampler,
            encoder: None,
            blits_recorded: 0,
        }
    }

    /// Blits recorded since the last [`Self::finish`].
    pub fn blits_recorded(&self) -> u32 {
        self.blits_recorded
    }

    /// Hands the recorded commands to the host for submission.
    pub fn finish(&mut self) -> Option<wgpu::CommandBuffer> {
        let encoder = self.encoder.take()?;
        debug!("atlas blit batch finished blits={}", self.blits_recorded);
        self.blits_recorded = 0;
        Some(encoder.finish())
    }
}

impl BlitExecutor<wgpu::TextureView> for WgpuBlitter {
    type Surface = PageSurface;

    fn create_surface(&mut self, descriptor: &SurfaceDescriptor) -> PageSurface {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("atlas.page"),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PAGE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        PageSurface {
            page: descriptor.page,
            width: descriptor.width,
            height: descriptor.height,
            texture,
            view,
        }
    }

    fn blit(
        &mut self,
        surface: &PageSurface,
        dst: PixelRect,
        source: &wgpu::TextureView,
        mode: BlitMode,
    ) -> Result<(), BlitError> {
        let scissor =
            scissor_rect(dst, surface.width, surface.height).ok_or(BlitError::RectOutOfBounds)?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("atlas.blit.bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("atlas.blit.encoder"),
            })
        });
        let pipeline = match mode {
            BlitMode::Identity => &self.identity_pipeline,
            BlitMode::GammaToLinear => &self.gamma_to_linear_pipeline,
            BlitMode::LinearToGamma => &self.linear_to_gamma_pipeline,
        };
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("atlas.blit.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_viewport(
                dst.x as f32,
                dst.y as f32,
                dst.width as f32,
                dst.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(scissor.0, scissor.1, scissor.2, scissor.3);
            pass.draw(0..3, 0..1);
        }
        self.blits_recorded += 1;
        Ok(())
    }

    /// Dropped rather than destroyed, for the same reason as [`WgpuImages`] releases.
    ///
    /// [`WgpuImages`]: crate::WgpuImages
    fn destroy_surface(&mut self, surface: PageSurface) {
        debug!("dropping page texture page={:?}", surface.page);
        drop(surface);
    }
}

/// `(x, y, width, height)` scissor for `dst`, or `None` when `dst` leaves the surface.
fn scissor_rect(dst: PixelRect, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if dst.width == 0 || dst.height == 0 {
        return None;
    }
    let x = u32::try_from(dst.x).ok()?;
    let y = u32::try_from(dst.y).ok()?;
    let right = x.checked_add(dst.width)?;
    let bottom = y.checked_add(dst.height)?;
    if right > width || bottom > height {
        return None;
    }
    Some((x, y, dst.width, dst.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scissor_accepts_rects_inside_surface() {
        assert_eq!(
            scissor_rect(PixelRect::new(0, 0, 16, 16), 64, 64),
            Some((0, 0, 16, 16))
        );
        assert_eq!(
            scissor_rect(PixelRect::new(48, 48, 16, 16), 64, 64),
            Some((48, 48, 16, 16))
        );
    }

    #[test]
    fn scissor_rejects_rects_leaving_surface() {
        assert_eq!(scissor_rect(PixelRect::new(-1, 0, 16, 16), 64, 64), None);
        assert_eq!(scissor_rect(PixelRect::new(50, 0, 16, 16), 64, 64), None);
        assert_eq!(scissor_rect(PixelRect::new(0, 0, 0, 16), 64, 64), None);
    }
}
