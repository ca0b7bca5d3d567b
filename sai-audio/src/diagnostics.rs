//! Register dumps for bring-up and debugging.
//!
//! Nothing in the driver dumps registers on its own; call
//! [`Diagnostics::dump_registers`] when you want a snapshot.
//!
//! ```ignore
//! let dump = sai.dump_registers();
//! log::info!("{}", dump);
//! // TCSR   @0x008 = 0x80000001
//! // TCR1   @0x00c = 0x00000020
//! // ...
//! ```

use core::fmt;

/// Capacity of a [`RegisterDump`].
pub const MAX_DUMP_ENTRIES: usize = 24;

/// One dumped register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterEntry {
    pub name: &'static str,
    pub offset: u32,
    pub value: u32,
}

/// Fixed-capacity list of named register values.
#[derive(Debug, Clone)]
pub struct RegisterDump {
    entries: [Option<RegisterEntry>; MAX_DUMP_ENTRIES],
    len: usize,
}

impl RegisterDump {
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_DUMP_ENTRIES],
            len: 0,
        }
    }

    /// Append an entry. Returns `false` (dropping it) when full.
    pub fn push(&mut self, name: &'static str, offset: u32, value: u32) -> bool {
        if self.len == MAX_DUMP_ENTRIES {
            return false;
        }
        self.entries[self.len] = Some(RegisterEntry {
            name,
            offset,
            value,
        });
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterEntry> {
        self.entries[..self.len].iter().flatten()
    }

    /// Value of the first entry called `name`.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.iter().find(|e| e.name == name).map(|e| e.value)
    }
}

impl Default for RegisterDump {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in self.iter() {
            writeln!(f, "{:<6} @{:#05x} = {:#010x}", e.name, e.offset, e.value)?;
        }
        Ok(())
    }
}

/// Explicitly invoked register snapshot.
pub trait Diagnostics {
    fn dump_registers(&self) -> RegisterDump;
}
