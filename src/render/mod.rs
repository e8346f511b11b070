pub mod headless;
pub mod native;

pub use headless::HeadlessBackend;
pub use native::WgpuBackend;
