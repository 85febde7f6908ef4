//! Target part abstraction and transfer session.

pub mod part;
pub mod xmega;

// Re-export common types
pub use part::{
    DEFAULT_BAUD, DEFAULT_BOOT_ADDR, DEFAULT_INFO_ADDR, LinkAddresses, Part, PartSpec, Uploader,
};
pub use xmega::session::{SessionConfig, UploadSummary, XmegaSession};
