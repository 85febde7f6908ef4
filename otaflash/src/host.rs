//! Host-side utilities for serial port discovery.

#[cfg(feature = "native")]
use crate::device::DetectedPort;

/// Discover all available serial ports.
#[cfg(feature = "native")]
#[must_use]
pub fn discover_ports() -> Vec<DetectedPort> {
    crate::device::detect_ports()
}

/// Auto-detect a single best serial port candidate.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> crate::Result<DetectedPort> {
    crate::device::auto_detect_port()
}
