// gpu/encoded.rs — the encoded keypoint texture and its readback future.
//
// Encoded keypoints travel in an `Rgba16Uint` texture: 4 little-endian
// u16 channels per texel, 8 bytes per texel, texels in row-major order
// forming one packed byte stream (see encoding.rs for the record layout).
// Records are 32-bit word aligned, not texel aligned — a record may
// straddle a texel boundary. GPU producers therefore build the stream in
// an `array<u32>` storage buffer (each word owned by exactly one record,
// so no atomics beyond the slot counter) and copy buffer → texture.
//
// PRODUCER INVARIANT: every producer must cover the FULL texture area,
// pre-filling unwritten words with 0xFFFFFFFF so that unused slots read
// back as end-of-list sentinels. A partially written texture would decode
// zero-filled slots as keypoints at (0, 0).
//
// `download` is the engine's explicit suspension point: `start_readback`
// enqueues a texture → MAP_READ buffer copy and requests the async map,
// returning a `KeypointReadback` handle the caller polls or waits on.
// Dropping the handle abandons the transfer (coarse cancellation).

use wgpu::util::DeviceExt;

use crate::algorithm::FeatureError;
use crate::encoding::{decode_stream, record_size};
use crate::globals::MAX_TEXTURE_LENGTH;
use crate::gpu::device::GpuDevice;
use crate::keypoint::Keypoint;

/// Bytes per `Rgba16Uint` texel (4 channels × 2 bytes).
pub const BYTES_PER_TEXEL: u32 = 8;

// ---------------------------------------------------------------------------
// KeypointTexture
// ---------------------------------------------------------------------------

/// A GPU texture holding one packed stream of encoded keypoint records,
/// together with the layout it was allocated for. Produced fresh by each
/// `FeatureAlgorithm::run` call and overwritten/dropped on the next.
pub struct KeypointTexture {
    pub texture: wgpu::Texture,
    /// View for binding as `texture_2d<u32>` when a later stage samples
    /// the stream directly.
    pub view: wgpu::TextureView,
    /// Width in texels. Always a power of two ≥ 32, so each row is a
    /// multiple of 256 bytes and buffer↔texture copies need no padding.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Maximum number of records the stream area can hold, not counting
    /// the end-of-list terminator.
    pub capacity: usize,
    /// Descriptor bytes per record this texture was allocated for.
    pub descriptor_size: usize,
    /// Extra bytes per record this texture was allocated for.
    pub extra_size: usize,
}

impl KeypointTexture {
    /// Allocate a texture large enough for `capacity` records of the
    /// given layout plus the end-of-list terminator.
    ///
    /// The texture is near-square with a power-of-two width, which keeps
    /// every row 256-byte aligned for wgpu copies.
    pub fn for_capacity(
        gpu: &GpuDevice,
        capacity: usize,
        descriptor_size: usize,
        extra_size: usize,
    ) -> Result<Self, FeatureError> {
        let rs = record_size(descriptor_size, extra_size);
        let total_bytes = (capacity + 1) * rs;
        let texels = (total_bytes as u32 + BYTES_PER_TEXEL - 1) / BYTES_PER_TEXEL;

        // Smallest power-of-two width ≥ sqrt(texels), floored at 32 texels
        // (= 256 bytes per row, wgpu's copy alignment).
        let mut width: u32 = 32;
        while width * width < texels && width < MAX_TEXTURE_LENGTH {
            width *= 2;
        }
        let height = (texels + width - 1) / width;
        if width > MAX_TEXTURE_LENGTH || height > MAX_TEXTURE_LENGTH {
            return Err(FeatureError::CapacityTooLarge {
                capacity,
                record_size: rs,
            });
        }

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("KeypointTexture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(KeypointTexture {
            texture,
            view,
            width,
            height,
            capacity,
            descriptor_size,
            extra_size,
        })
    }

    /// Upload a packed keypoint byte stream (e.g. from
    /// `encoding::encode_stream`) into a fresh texture. Host-side entry
    /// used by tests and synthetic pipelines.
    pub fn from_packed_stream(
        gpu: &GpuDevice,
        stream: &[u8],
        descriptor_size: usize,
        extra_size: usize,
    ) -> Result<Self, FeatureError> {
        let rs = record_size(descriptor_size, extra_size);
        let capacity = (stream.len() + rs - 1) / rs;
        let tex = Self::for_capacity(gpu, capacity, descriptor_size, extra_size)?;

        // Pad to the full texture area with end-of-list words (producer
        // invariant: never leave zero-initialized texels behind).
        let mut padded = vec![0xFFu8; tex.byte_len()];
        padded[..stream.len()].copy_from_slice(stream);

        let staging = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("KeypointTexture::staging"),
            contents: &padded,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("KeypointTexture::upload"),
            });
        encoder.copy_buffer_to_texture(
            tex.as_copy_buffer(&staging),
            tex.as_copy_texture(),
            tex.extent(),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        Ok(tex)
    }

    /// Total byte size of the packed stream area (full texture).
    pub fn byte_len(&self) -> usize {
        (self.width * self.height * BYTES_PER_TEXEL) as usize
    }

    /// Bytes per texel row. A multiple of 256 by construction.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * BYTES_PER_TEXEL
    }

    /// Copy extent covering the whole texture.
    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// `ImageCopyTexture` for whole-texture copies.
    pub(crate) fn as_copy_texture(&self) -> wgpu::ImageCopyTexture<'_> {
        wgpu::ImageCopyTexture {
            texture: &self.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        }
    }

    /// `ImageCopyBuffer` wrapping `buffer` with this texture's row layout.
    pub(crate) fn as_copy_buffer<'a>(&self, buffer: &'a wgpu::Buffer) -> wgpu::ImageCopyBuffer<'a> {
        wgpu::ImageCopyBuffer {
            buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.bytes_per_row()),
                rows_per_image: Some(self.height),
            },
        }
    }

    /// Start a non-blocking GPU → host readback of the encoded stream.
    ///
    /// Enqueues the texture → buffer copy and the async map request, then
    /// returns immediately. `flags` (`DOWNLOAD_*`) is captured for the
    /// decoding step and forwarded verbatim.
    pub fn start_readback(&self, gpu: &GpuDevice, flags: u8) -> KeypointReadback {
        let size = self.byte_len() as u64;
        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("KeypointTexture::readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("KeypointTexture::readback"),
            });
        encoder.copy_texture_to_buffer(
            self.as_copy_texture(),
            self.as_copy_buffer(&readback_buf),
            self.extent(),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        readback_buf
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The receiver may have been dropped (readback abandoned).
                let _ = sender.send(result);
            });

        KeypointReadback {
            buffer: readback_buf,
            receiver,
            outcome: None,
            descriptor_size: self.descriptor_size,
            extra_size: self.extra_size,
            flags,
        }
    }
}

// ---------------------------------------------------------------------------
// KeypointReadback
// ---------------------------------------------------------------------------

/// A pending GPU → host keypoint transfer.
///
/// The controlling thread is never blocked implicitly: poll with
/// [`is_ready`](KeypointReadback::is_ready) or block explicitly with
/// [`wait`](KeypointReadback::wait). Dropping the handle abandons the
/// transfer; the producing texture must not be reused by the caller while
/// the GPU may still be writing it.
pub struct KeypointReadback {
    buffer: wgpu::Buffer,
    receiver: std::sync::mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
    outcome: Option<Result<(), wgpu::BufferAsyncError>>,
    descriptor_size: usize,
    extra_size: usize,
    flags: u8,
}

impl KeypointReadback {
    /// Poll the device once (non-blocking) and report whether the
    /// transfer has completed.
    pub fn is_ready(&mut self, gpu: &GpuDevice) -> bool {
        if self.outcome.is_some() {
            return true;
        }
        gpu.device.poll(wgpu::Maintain::Poll);
        if let Ok(result) = self.receiver.try_recv() {
            self.outcome = Some(result);
        }
        self.outcome.is_some()
    }

    /// Block until the transfer completes, then decode the stream with
    /// the layout captured at download time.
    pub fn wait(mut self, gpu: &GpuDevice) -> Result<Vec<Keypoint>, FeatureError> {
        if self.outcome.is_none() {
            gpu.device.poll(wgpu::Maintain::Wait);
            let result = self
                .receiver
                .recv()
                .unwrap_or(Err(wgpu::BufferAsyncError));
            self.outcome = Some(result);
        }
        if let Some(Err(e)) = self.outcome.take() {
            return Err(FeatureError::Readback(e));
        }

        let slice = self.buffer.slice(..);
        let mapped = slice.get_mapped_range();
        let keypoints = decode_stream(&mapped, self.descriptor_size, self.extra_size, self.flags);
        drop(mapped);
        self.buffer.unmap();
        keypoints
    }

    /// The layout this readback will decode with.
    pub fn layout(&self) -> (usize, usize) {
        (self.descriptor_size, self.extra_size)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
