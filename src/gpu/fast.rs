// gpu/fast.rs — GPU FAST corner detector, the terminal algorithm of a
// typical chain.
//
// Two passes per frame:
//
//   1. detect_corners (fast.wgsl): each thread scores its own pixel into a
//      dense scores[y * width + x] slot — no contention, no atomics.
//
//   2. encode_keypoints (encode.wgsl): threads with a positive score claim
//      a record slot via one atomicAdd on a counter and write their packed
//      record into an array<u32> stream buffer. Records are 32-bit word
//      aligned, so slot words never overlap between threads. The buffer is
//      pre-filled with 0xFFFFFFFF so unclaimed slots read back as
//      end-of-list sentinels, then copied into the Rgba16Uint texture.
//
// The records are sized by the detector's CURRENT layout. A decorator
// chain cascades its negotiated `descriptor_size`/`extra_size` down to
// this detector at assembly time, so the extra/descriptor regions are
// already reserved (zero-filled) for the outer stages that fill them in.

use wgpu::util::DeviceExt;

use crate::algorithm::{FeatureAlgorithm, FeatureError};
use crate::encoding::record_size;
use crate::gpu::device::GpuDevice;
use crate::gpu::encoded::{KeypointReadback, KeypointTexture};
use crate::gpu::image::GpuImage;

// ---------------------------------------------------------------------------
// Uniform params (must match the WGSL structs exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FastParams {
    img_width: u32,
    img_height: u32,
    threshold: f32,
    arc_length: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct EncodeParams {
    img_width: u32,
    img_height: u32,
    record_words: u32,
    max_keypoints: u32,
}

// ---------------------------------------------------------------------------
// FastKeypointDetector
// ---------------------------------------------------------------------------

/// GPU FAST-N corner detector emitting encoded keypoint records.
///
/// Create once (shader compilation is expensive); call
/// [`run`](FeatureAlgorithm::run) each frame. Starts with
/// `descriptor_size = extra_size = 0`; wrap it in decorators to grow the
/// record layout.
pub struct FastKeypointDetector {
    detect_pipeline: wgpu::ComputePipeline,
    detect_bgl: wgpu::BindGroupLayout,
    encode_pipeline: wgpu::ComputePipeline,
    encode_bgl: wgpu::BindGroupLayout,
    /// Intensity difference threshold. Typical: 20–40 for u8 frames.
    pub threshold: u8,
    /// Contiguous arc length (the N in FAST-N), in [9, 12].
    pub arc_length: usize,
    /// Maximum number of keypoints encoded per frame; detections past
    /// this are dropped on the GPU.
    pub max_keypoints: usize,
    descriptor_size: usize,
    extra_size: usize,
}

impl FastKeypointDetector {
    /// # Panics
    /// Panics if `arc_length` is not in [9, 12].
    pub fn new(gpu: &GpuDevice, threshold: u8, arc_length: usize) -> Self {
        assert!(
            (9..=12).contains(&arc_length),
            "arc_length must be 9..=12 (got {arc_length})"
        );

        let wg = gpu.workgroup_size;
        let make_module = |label: &str, template: &str| {
            let src = template
                .replace("{{WG_X}}", &wg.x.to_string())
                .replace("{{WG_Y}}", &wg.y.to_string());
            gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            })
        };
        let detect_shader = make_module("fast.wgsl", include_str!("../shaders/fast.wgsl"));
        let encode_shader = make_module("encode.wgsl", include_str!("../shaders/encode.wgsl"));

        let detect_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("FastDetect BGL"),
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
                    // 1 — dense score buffer
                    storage_entry(1, false),
                    // 2 — params
                    uniform_entry(2),
                ],
            });

        let encode_bgl = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("FastEncode BGL"),
                entries: &[
                    // 0 — score buffer (read)
                    storage_entry(0, true),
                    // 1 — packed record stream
                    storage_entry(1, false),
                    // 2 — slot counter
                    storage_entry(2, false),
                    // 3 — params
                    uniform_entry(3),
                ],
            });

        let make_pipeline = |label: &str,
                             bgl: &wgpu::BindGroupLayout,
                             module: &wgpu::ShaderModule,
                             entry: &str| {
            let layout = gpu
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[bgl],
                    push_constant_ranges: &[],
                });
            gpu.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    module,
                    entry_point: entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        };

        let detect_pipeline =
            make_pipeline("detect_corners", &detect_bgl, &detect_shader, "detect_corners");
        let encode_pipeline =
            make_pipeline("encode_keypoints", &encode_bgl, &encode_shader, "encode_keypoints");

        FastKeypointDetector {
            detect_pipeline,
            detect_bgl,
            encode_pipeline,
            encode_bgl,
            threshold,
            arc_length,
            max_keypoints: 8192,
            descriptor_size: 0,
            extra_size: 0,
        }
    }
}

impl FeatureAlgorithm for FastKeypointDetector {
    fn run(&self, gpu: &GpuDevice, input: &GpuImage) -> Result<KeypointTexture, FeatureError> {
        let w = input.width;
        let h = input.height;
        let n_pixels = (w * h) as usize;

        // Dense score buffer (zero-filled by wgpu).
        let score_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FastDetect scores"),
            size: (n_pixels * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let detect_params = FastParams {
            img_width: w,
            img_height: h,
            threshold: self.threshold as f32,
            arc_length: self.arc_length as u32,
        };
        let detect_params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FastDetect params"),
            contents: bytemuck::bytes_of(&detect_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let detect_bg = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FastDetect BG"),
            layout: &self.detect_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input.view),
                },
                wgpu::BindGroupEntry { binding: 1, resource: score_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: detect_params_buf.as_entire_binding() },
            ],
        });

        // Encoded output, sized by the CURRENT (possibly cascaded) layout.
        let tex = KeypointTexture::for_capacity(
            gpu,
            self.max_keypoints,
            self.descriptor_size,
            self.extra_size,
        )?;

        // Stream buffer pre-filled with end-of-list words.
        let stream_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FastEncode stream"),
            contents: &vec![0xFFu8; tex.byte_len()],
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let counter_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FastEncode counter"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let encode_params = EncodeParams {
            img_width: w,
            img_height: h,
            record_words: (record_size(self.descriptor_size, self.extra_size) / 4) as u32,
            max_keypoints: self.max_keypoints as u32,
        };
        let encode_params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("FastEncode params"),
            contents: bytemuck::bytes_of(&encode_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let encode_bg = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FastEncode BG"),
            layout: &self.encode_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: score_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: stream_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: counter_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: encode_params_buf.as_entire_binding() },
            ],
        });

        // One submission: detect → encode → copy into the texture.
        // Pass boundaries order the buffer accesses.
        let (dx, dy) = gpu.dispatch_size(w, h);
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FastKeypointDetector::run"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("detect_corners"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.detect_pipeline);
            pass.set_bind_group(0, &detect_bg, &[]);
            pass.dispatch_workgroups(dx, dy, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("encode_keypoints"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.encode_pipeline);
            pass.set_bind_group(0, &encode_bg, &[]);
            pass.dispatch_workgroups(dx, dy, 1);
        }
        encoder.copy_buffer_to_texture(
            tex.as_copy_buffer(&stream_buf),
            tex.as_copy_texture(),
            tex.extent(),
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        Ok(tex)
    }

    fn download(
        &self,
        gpu: &GpuDevice,
        encoded: &KeypointTexture,
        flags: u8,
    ) -> Result<KeypointReadback, FeatureError> {
        if encoded.descriptor_size != self.descriptor_size {
            return Err(FeatureError::LayoutMismatch {
                field: "descriptor_size",
                expected: self.descriptor_size,
                actual: encoded.descriptor_size,
            });
        }
        if encoded.extra_size != self.extra_size {
            return Err(FeatureError::LayoutMismatch {
                field: "extra_size",
                expected: self.extra_size,
                actual: encoded.extra_size,
            });
        }
        Ok(encoded.start_readback(gpu, flags))
    }

    fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    fn extra_size(&self) -> usize {
        self.extra_size
    }

    fn set_descriptor_size(&mut self, bytes: usize) {
        debug_assert!(bytes % 4 == 0, "descriptor_size must be a multiple of 4");
        self.descriptor_size = bytes;
    }

    fn set_extra_size(&mut self, bytes: usize) {
        debug_assert!(bytes % 4 == 0, "extra_size must be a multiple of 4");
        self.extra_size = bytes;
    }
}

// ---------------------------------------------------------------------------
// Bind group layout helpers
// ---------------------------------------------------------------------------

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::DOWNLOAD_NONE;

    // GPU tests run in an isolated child process: dzn (the D3D12-to-Vulkan
    // layer on WSL2) SIGSEGVs in its own atexit handler once any Vulkan
    // device existed in the process. The inner tests print "GPU_TEST_OK"
    // before returning and the outer wrappers assert on the output, never
    // the exit status.

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args(["test", "--lib", "--", test_name, "--exact", "--ignored", "--nocapture"])
            .output()
            .unwrap_or_else(|e| panic!("subprocess failed for {test_name}: {e}"));
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    /// 64×64 frame: dark background with one bright square, whose corners
    /// are unambiguous FAST detections.
    fn bright_square_frame() -> Vec<u8> {
        let mut pixels = vec![20u8; 64 * 64];
        for y in 20..44usize {
            for x in 20..44usize {
                pixels[y * 64 + x] = 220;
            }
        }
        pixels
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_flat_frame_has_no_keypoints() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let frame = GpuImage::upload(&gpu, 64, 64, &vec![128u8; 64 * 64]);
        let detector = FastKeypointDetector::new(&gpu, 20, 9);
        let encoded = detector.run(&gpu, &frame).unwrap();
        let kps = detector
            .download(&gpu, &encoded, DOWNLOAD_NONE)
            .unwrap()
            .wait(&gpu)
            .unwrap();
        assert!(kps.is_empty(), "flat frame should have no corners, got {}", kps.len());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_detects_and_downloads_square_corners() {
        let gpu = GpuDevice::new().expect("need Vulkan GPU");
        let frame = GpuImage::upload(&gpu, 64, 64, &bright_square_frame());
        let detector = FastKeypointDetector::new(&gpu, 30, 9);
        let encoded = detector.run(&gpu, &frame).unwrap();
        let kps = detector
            .download(&gpu, &encoded, DOWNLOAD_NONE)
            .unwrap()
            .wait(&gpu)
            .unwrap();
        assert!(!kps.is_empty(), "bright square should produce corners");
        for kp in &kps {
            assert!(kp.x >= 0.0 && kp.x < 64.0 && kp.y >= 0.0 && kp.y < 64.0);
            assert!(kp.score > 0.0);
            assert!(kp.extra.is_empty() && kp.descriptor.is_empty());
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_flat_frame_has_no_keypoints() {
        let out = run_gpu_test_in_subprocess("gpu::fast::tests::inner_flat_frame_has_no_keypoints");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_detects_and_downloads_square_corners() {
        let out = run_gpu_test_in_subprocess(
            "gpu::fast::tests::inner_detects_and_downloads_square_corners",
        );
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
