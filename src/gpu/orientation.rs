// gpu/orientation.rs — orientation decorator.
//
// The worked example of a derived decorator: it embeds a
// `FeatureAlgorithmDecorator` for all layout bookkeeping and adds one GPU
// pass after the delegated `run`. Orientation lives in the header's
// rotation byte, so the record layout is inherited unchanged (the
// decorator is constructed with the 0-means-inherit sizes).
//
// The pass round-trips the encoded texture through a storage buffer:
//
//   copy texture → buffer
//   orient_keypoints dispatch (one thread per record slot)
//   copy buffer → texture
//
// all in one submission. Working buffer-side keeps writes word-granular —
// records may straddle texel boundaries, and textureStore on a shared
// texel would race between neighbouring records.

use wgpu::util::DeviceExt;

use crate::algorithm::{FeatureAlgorithm, FeatureError};
use crate::decorator::FeatureAlgorithmDecorator;
use crate::encoding::record_size;
use crate::gpu::device::GpuDevice;
use crate::gpu::encoded::{KeypointReadback, KeypointTexture};
use crate::gpu::fast::{storage_entry, uniform_entry};
use crate::gpu::image::GpuImage;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct OrientParams {
    record_words: u32,
    capacity: u32,
    img_width: u32,
    img_height: u32,
    patch_radius: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Computes an intensity-centroid orientation for every encoded keypoint
/// and sets `KPF_ORIENTED`.
pub struct OrientationDecorator {
    inner: FeatureAlgorithmDecorator,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    /// Half-width of the centroid patch, in pixels.
    pub patch_radius: u32,
}

impl OrientationDecorator {
    /// Wrap `decorated`, inheriting its record layout.
    pub fn new(gpu: &GpuDevice, decorated: Box<dyn FeatureAlgorithm>) -> Result<Self, FeatureError> {
        let inner = FeatureAlgorithmDecorator::new(decorated, 0, 0)?;

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("orientation.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/orientation.wgsl").into()),
        });

        let bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Orientation BGL"),
                entries: &[
                    // 0 — input frame
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                    // 1 — packed record stream
                    storage_entry(1, false),
                    // 2 — params
                    uniform_entry(2),
                ],
            });

        let layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Orientation pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });
        let pipeline = gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("orient_keypoints"),
                layout: Some(&layout),
                module: &shader,
                entry_point: "orient_keypoints",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        Ok(OrientationDecorator {
            inner,
            pipeline,
            bgl,
            patch_radius: 7,
        })
    }

    /// The wrapped algorithm, for introspection and chain assembly.
    pub fn decorated(&self) -> &dyn FeatureAlgorithm {
        self.inner.decorated()
    }
}

impl FeatureAlgorithm for OrientationDecorator {
    fn run(&self, gpu: &GpuDevice, input: &GpuImage) -> Result<KeypointTexture, FeatureError> {
        let encoded = self.inner.run(gpu, input)?;

        // Working buffer for the stream round trip. Fully overwritten by
        // the texture copy, so no initialization needed.
        let stream_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Orientation stream"),
            size: encoded.byte_len() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let params = OrientParams {
            record_words: (record_size(self.descriptor_size(), self.extra_size()) / 4) as u32,
            capacity: encoded.capacity as u32,
            img_width: input.width,
            img_height: input.height,
            patch_radius: self.patch_radius,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Orientation params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Orientation BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input.view),
                },
                wgpu::BindGroupEntry { binding: 1, resource: stream_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: params_buf.as_entire_binding() },
            ],
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("OrientationDecorator::run"),
            });
        encoder.copy_texture_to_buffer(
            encoded.as_copy_texture(),
            encoded.as_copy_buffer(&stream_buf),
            encoded.extent(),
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("orient_keypoints"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // One thread per record slot, 64-wide workgroups.
            pass.dispatch_workgroups((encoded.capacity as u32 + 63) / 64, 1, 1);
        }
        encoder.copy_buffer_to_texture(
            encoded.as_copy_buffer(&stream_buf),
            encoded.as_copy_texture(),
            encoded.extent(),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        Ok(encoded)
    }

    fn download(
        &self,
        gpu: &GpuDevice,
        encoded: &KeypointTexture,
        flags: u8,
    ) -> Result<KeypointReadback, FeatureError> {
        self.inner.download(gpu, encoded, flags)
    }

    fn descriptor_size(&self) -> usize {
        self.inner.descriptor_size()
    }

    fn extra_size(&self) -> usize {
        self.inner.extra_size()
    }

    fn set_descriptor_size(&mut self, bytes: usize) {
        self.inner.set_descriptor_size(bytes);
    }

    fn set_extra_size(&mut self, bytes: usize) {
        self.inner.set_extra_size(bytes);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
