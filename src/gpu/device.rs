// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Verify that the device's texture limits cover the coordinate range
//     of the fixed-point keypoint encoding (MAX_TEXTURE_LENGTH).
//   - Provide `WorkgroupSize` and ceiling-division dispatch sizing for the
//     2D compute kernels.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that
// may grab llvmpipe/softpipe on WSL2 (where the software renderer appears
// as a valid Vulkan device). We enumerate explicitly and prefer real
// hardware, falling back to whatever exists as a last resort.
//
// The engine holds one `GpuDevice` for its lifetime; `run`/`download`
// borrow it per call and never retain it.

use std::fmt;

use crate::globals::MAX_TEXTURE_LENGTH;

/// A workgroup size configuration for 2D compute dispatches.
///
/// Both dimensions should be powers of two and their product must not
/// exceed the device's `max_compute_invocations_per_workgroup` limit —
/// `GpuDevice::set_workgroup_size` validates this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl Default for WorkgroupSize {
    /// 16×8 = 128 invocations: 4 NVIDIA warps / 2 AMD waves, with the
    /// 16-wide x dimension matching row-major image access.
    fn default() -> Self {
        WorkgroupSize { x: 16, y: 8 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The GPU execution context: adapter, device, queue.
///
/// Expensive to create (Vulkan instance + device initialization); create
/// once and pass by reference into every `run`/`download` call.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue` — dzn (the
/// D3D12-to-Vulkan layer on WSL2) crashes if the Vulkan instance dies
/// while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    max_invocations: u32,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` using the first non-CPU Vulkan adapter found.
    ///
    /// # Errors
    /// Returns `Err` if no suitable adapter is found, the device request
    /// fails, or the device cannot hold textures up to
    /// `MAX_TEXTURE_LENGTH` pixels per side.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async())
    }

    async fn init_async() -> Result<Self, GpuError> {
        // Vulkan only. ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER keeps dzn
        // (which declares itself non-conformant on WSL2) enumerable so we
        // can still pick it over llvmpipe. We run compute-only work with
        // no reliance on conformance-required rendering behaviour.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            eprintln!(
                "[glint] Vulkan adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        // Tier 1: real hardware (or dzn/VM pass-through, which report as
        // Other/VirtualGpu). Tier 2: take anything, even a software
        // rasterizer — the adapter name is logged so you know.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // The fixed-point encoding addresses coordinates up to
        // MAX_TEXTURE_LENGTH; a device that cannot allocate textures that
        // large would silently clip the coordinate domain.
        let supported = adapter.limits().max_texture_dimension_2d;
        if supported < MAX_TEXTURE_LENGTH {
            return Err(GpuError::TextureLimitTooSmall {
                supported,
                required: MAX_TEXTURE_LENGTH,
            });
        }

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("glint"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        let max_invocations = device.limits().max_compute_invocations_per_workgroup;

        Ok(GpuDevice {
            device,
            queue,
            adapter_info,
            workgroup_size: WorkgroupSize::default(),
            max_invocations,
            _instance: instance,
        })
    }

    /// Override the default workgroup size, validating against the
    /// device's invocation limit.
    pub fn set_workgroup_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        if total > self.max_invocations {
            return Err(GpuError::WorkgroupTooLarge {
                total,
                max: self.max_invocations,
            });
        }
        self.workgroup_size = WorkgroupSize { x, y };
        Ok(())
    }

    /// Workgroup counts covering a `img_w`×`img_h` grid with the active
    /// workgroup size. Ceiling division — kernels must guard against
    /// out-of-bounds global IDs:
    /// ```wgsl
    /// if gid.x >= width || gid.y >= height { return; }
    /// ```
    pub fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
        let dx = (img_w + self.workgroup_size.x - 1) / self.workgroup_size.x;
        let dy = (img_h + self.workgroup_size.y - 1) / self.workgroup_size.y;
        (dx, dy)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, workgroup: {} }}",
            self.adapter_info, self.workgroup_size
        )
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from GPU device initialization and configuration.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found. On WSL2: check that Vulkan is installed
    /// and `vulkaninfo` shows a real GPU.
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits, etc.).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested workgroup size exceeds the device's invocation limit.
    WorkgroupTooLarge { total: u32, max: u32 },
    /// The adapter cannot allocate textures spanning the keypoint
    /// encoding's coordinate range.
    TextureLimitTooSmall { supported: u32, required: u32 },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no suitable Vulkan adapter found (only CPU/software renderers visible)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::WorkgroupTooLarge { total, max } => write!(
                f,
                "workgroup size {total} exceeds device limit of {max} invocations"
            ),
            GpuError::TextureLimitTooSmall { supported, required } => write!(
                f,
                "adapter supports 2D textures up to {supported} px, keypoint encoding \
                 requires {required}"
            ),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================
