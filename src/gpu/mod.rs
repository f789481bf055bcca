// gpu/mod.rs — wgpu execution layer.
//
// `device` owns the adapter/device/queue context every call borrows;
// `image` uploads input frames; `encoded` holds the keypoint texture and
// the asynchronous readback; `fast` and `orientation` are the two
// concrete stages shipped with the engine (a terminal detector and a
// derived decorator). All kernels are WGSL compute shaders under
// src/shaders/.

pub mod device;
pub mod encoded;
pub mod fast;
pub mod image;
pub mod orientation;
