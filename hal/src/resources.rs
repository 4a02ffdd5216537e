//! # Hardware Resources
//!
//! Assignment of the translated resource list to the device's windows: the
//! first memory resource is the register file (BAR0), the second the SRAM
//! (BAR2). Port and interrupt resources are ignored here.

use hsac_core::{Error, PhysAddr, Result};

/// Kind of a translated hardware resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Memory-mapped range
    Memory,
    /// I/O port range
    Port,
    /// Interrupt line or message
    Interrupt,
}

/// One translated hardware resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResource {
    /// Resource kind
    pub kind: ResourceKind,
    /// Bus address
    pub start: PhysAddr,
    /// Length in bytes
    pub len: usize,
}

impl RawResource {
    /// Memory resource
    pub const fn memory(start: PhysAddr, len: usize) -> Self {
        Self {
            kind: ResourceKind::Memory,
            start,
            len,
        }
    }
}

/// Memory resources assigned to the device windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedBars {
    /// Register file window
    pub registers: RawResource,
    /// SRAM window, when the device exposes one
    pub sram: Option<RawResource>,
}

/// Pick the register and SRAM windows out of a resource list
///
/// Fails with `ConfigurationError` when no memory resource is present.
pub fn assign_bars(resources: &[RawResource]) -> Result<AssignedBars> {
    let mut memory = resources
        .iter()
        .filter(|r| r.kind == ResourceKind::Memory && r.len > 0);

    let registers = *memory.next().ok_or_else(|| {
        log::error!("HSAC: no memory resource for the register file");
        Error::ConfigurationError
    })?;
    let sram = memory.next().copied();

    log::info!(
        "HSAC: registers at {} ({} bytes), sram {}",
        registers.start,
        registers.len,
        if sram.is_some() { "present" } else { "absent" }
    );

    Ok(AssignedBars { registers, sram })
}
