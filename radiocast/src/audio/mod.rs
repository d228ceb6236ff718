/// Lock-free sample ring between the audio callback and the capture thread
pub mod buffer;

/// Audio capture and streaming
pub mod capture;

/// Audio device enumeration and lookup
pub mod device;

/// Audio-related error types
pub mod error;

/// s32le frame serialization
pub mod frame;

/// Synthetic tone input
pub mod tone;

// Re-export commonly used types
pub use capture::{
    start_capture, CaptureHandle, CaptureStats, CpalInput, FrameRead, InputOpener, SampleSource,
};
pub use device::{list_input_devices, resolve_by_name, AudioDevice};
pub use error::{AudioError, AudioResult};
pub use tone::ToneInput;
