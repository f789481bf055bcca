// gpu/image.rs — input frame upload (CPU → GPU).
//
// `GpuImage` is the borrowed input of every `FeatureAlgorithm::run` call:
// a grayscale frame resident on the GPU as an `R8Unorm` texture. The
// engine never takes ownership of it beyond the call — callers upload
// once per frame and hand out references.
//
// wgpu's `copy_buffer_to_texture` requires the source buffer's
// `bytes_per_row` to be a multiple of 256, so rows are staged into a
// 256-aligned buffer before upload and the padding is stripped again on
// readback.

use wgpu::util::DeviceExt;

use crate::globals::MAX_TEXTURE_LENGTH;
use crate::gpu::device::GpuDevice;

/// wgpu requires that the number of bytes per row in a buffer↔texture copy
/// is a multiple of this value.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// A grayscale `u8` frame resident on the GPU as a 2D `R8Unorm` texture.
///
/// In shaders, `textureLoad` returns the pixel as `.r` in [0, 1].
/// Owns its wgpu resources; dropping it releases the texture memory.
pub struct GpuImage {
    /// The underlying wgpu texture.
    pub texture: wgpu::Texture,
    /// Default view, bound as `texture_2d<f32>` by the kernels.
    pub view: wgpu::TextureView,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl GpuImage {
    /// Upload a tightly packed row-major grayscale frame to the GPU.
    ///
    /// Returns immediately — the copy runs asynchronously on the GPU
    /// timeline and is ordered before any later submission on the same
    /// queue.
    ///
    /// # Panics
    /// Panics if `pixels.len() != width * height` or either dimension
    /// exceeds `MAX_TEXTURE_LENGTH` (the fixed-point encoding could not
    /// represent coordinates beyond that).
    pub fn upload(gpu: &GpuDevice, width: u32, height: u32, pixels: &[u8]) -> Self {
        assert_eq!(
            pixels.len(),
            (width * height) as usize,
            "pixel buffer size must be width * height"
        );
        assert!(
            width <= MAX_TEXTURE_LENGTH && height <= MAX_TEXTURE_LENGTH,
            "frame dimensions {width}×{height} exceed the encodable maximum {MAX_TEXTURE_LENGTH}"
        );

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("GpuImage"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Stage rows into a 256-aligned buffer.
        let aligned_bytes_per_row = align_to(width, COPY_ALIGNMENT);
        let mut staging = vec![0u8; (aligned_bytes_per_row * height) as usize];
        for y in 0..height as usize {
            let src_start = y * width as usize;
            let dst_start = y * aligned_bytes_per_row as usize;
            staging[dst_start..dst_start + width as usize]
                .copy_from_slice(&pixels[src_start..src_start + width as usize]);
        }

        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuImage::staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("GpuImage::upload"),
            });

        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        gpu.queue.submit(std::iter::once(encoder.finish()));

        GpuImage {
            texture,
            view,
            width,
            height,
        }
    }

    /// Read the frame back to CPU memory (blocking; tests/debug only).
    ///
    /// Returns a tightly packed `Vec<u8>` of length `width * height`.
    pub fn readback(&self, gpu: &GpuDevice) -> Vec<u8> {
        let aligned_bytes_per_row = align_to(self.width, COPY_ALIGNMENT);
        let readback_size = (aligned_bytes_per_row * self.height) as u64;

        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuImage::readback"),
            size: readback_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("GpuImage::readback"),
            });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        gpu.queue.submit(std::iter::once(encoder.finish()));

        let buf_slice = readback_buf.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buf_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).expect("readback channel closed");
        });

        gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .expect("readback map callback never fired")
            .expect("readback map failed");

        let mapped = buf_slice.get_mapped_range();
        let mut out = vec![0u8; (self.width * self.height) as usize];
        for y in 0..self.height as usize {
            let src_start = y * aligned_bytes_per_row as usize;
            let dst_start = y * self.width as usize;
            out[dst_start..dst_start + self.width as usize]
                .copy_from_slice(&mapped[src_start..src_start + self.width as usize]);
        }
        drop(mapped);
        readback_buf.unmap();

        out
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
