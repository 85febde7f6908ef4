//! XMEGA OTA bootloader support.

pub mod plan;
pub mod session;
