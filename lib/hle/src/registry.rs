//! Static tables of native functions, keyed by NID.
//!
//! Each HLE module exports a `&'static [NativeFunction]` describing the
//! routines it implements and how their arguments are laid out in the
//! guest's argument registers. The registry is assembled once per session
//! and consulted by the syscall dispatcher.

use std::collections::HashMap;
use std::fmt;

use pspemu_cpu::{CpuState, GuestMemory, MAX_REGISTER_ARGS};
use thiserror::Error;

use crate::config::HleConfig;
use crate::context::HleContext;
use crate::waiting::HleOutcome;

/// How a register slot is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Void,
    Int,
    UInt,
    /// A guest address. `0` means the argument is absent.
    Ptr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub ret: ArgKind,
    pub params: &'static [ArgKind],
}

pub type Handler = fn(&mut HleContext, &HleCall) -> HleOutcome;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub nid: u32,
    pub name: &'static str,
    /// First firmware version exporting this routine.
    pub firmware: u32,
    pub signature: Signature,
    pub handler: Handler,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("nid", &format_args!("{:#010x}", self.nid))
            .field("name", &self.name)
            .field("firmware", &self.firmware)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Arguments of one dispatched call, read from `a0..t3`.
#[derive(Clone, Copy)]
pub struct HleCall {
    signature: Signature,
    args: [u32; MAX_REGISTER_ARGS],
}

impl HleCall {
    pub fn new(signature: Signature, args: &[u32]) -> Self {
        let mut slots = [0; MAX_REGISTER_ARGS];
        for (slot, value) in slots.iter_mut().zip(args) {
            *slot = *value;
        }
        Self {
            signature,
            args: slots,
        }
    }

    pub fn from_state(signature: Signature, state: &CpuState) -> Self {
        Self {
            signature,
            args: std::array::from_fn(|index| state.argument(index)),
        }
    }

    pub fn raw(&self, index: usize) -> u32 {
        self.args.get(index).copied().unwrap_or_default()
    }

    pub fn int(&self, index: usize) -> i32 {
        self.raw(index) as i32
    }

    pub fn uint(&self, index: usize) -> u32 {
        self.raw(index)
    }

    /// Views guest memory from the pointer in slot `index` to the end of RAM.
    ///
    /// A null pointer is an absent buffer. A pointer outside RAM yields an
    /// empty view so length checks fail instead of the argument looking
    /// absent.
    pub fn buffer<'m>(&self, memory: &'m GuestMemory, index: usize) -> Option<&'m [u8]> {
        match self.raw(index) {
            0 => None,
            address => Some(memory.tail(address).unwrap_or_default()),
        }
    }
}

impl fmt::Debug for HleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for (index, kind) in self.signature.params.iter().enumerate() {
            match kind {
                ArgKind::Void => continue,
                ArgKind::Int => list.entry(&self.int(index)),
                ArgKind::UInt => list.entry(&self.uint(index)),
                ArgKind::Ptr => list.entry(&format_args!("{:#010x}", self.raw(index))),
            };
        }
        list.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("NID {nid:#010x} ({name}) is already registered by {existing}")]
    DuplicateNid {
        nid: u32,
        name: &'static str,
        existing: &'static str,
    },
    #[error("{name} takes {count} arguments, more than fit in registers")]
    TooManyParams { name: &'static str, count: usize },
    #[error("no native function registered for NID {0:#010x}")]
    UnknownNid(u32),
}

#[derive(Debug)]
struct Registered {
    module: &'static str,
    function: &'static NativeFunction,
}

#[derive(Debug)]
pub struct HleRegistry {
    firmware: u32,
    functions: HashMap<u32, Registered>,
}

impl HleRegistry {
    pub fn new(firmware: u32) -> Self {
        Self {
            firmware,
            functions: HashMap::new(),
        }
    }

    pub fn from_config(config: &HleConfig) -> Self {
        Self::new(config.firmware_version)
    }

    pub fn firmware(&self) -> u32 {
        self.firmware
    }

    /// Registers every function in `table` available on this firmware.
    ///
    /// Nothing is registered if any NID collides, either with an earlier
    /// module or within `table`. Returns how many functions were added.
    pub fn register_module(
        &mut self,
        module: &'static str,
        table: &'static [NativeFunction],
    ) -> Result<usize, RegistryError> {
        let mut staged: HashMap<u32, Registered> = HashMap::new();
        for function in table {
            if function.firmware > self.firmware {
                tracing::debug!(
                    module,
                    name = function.name,
                    firmware = function.firmware,
                    "skipping function newer than the configured firmware"
                );
                continue;
            }
            if function.signature.params.len() > MAX_REGISTER_ARGS {
                return Err(RegistryError::TooManyParams {
                    name: function.name,
                    count: function.signature.params.len(),
                });
            }
            if let Some(existing) = self
                .functions
                .get(&function.nid)
                .or_else(|| staged.get(&function.nid))
            {
                return Err(RegistryError::DuplicateNid {
                    nid: function.nid,
                    name: function.name,
                    existing: existing.function.name,
                });
            }
            staged.insert(function.nid, Registered { module, function });
        }

        let added = staged.len();
        self.functions.extend(staged);
        tracing::debug!(module, added, "registered HLE module");
        Ok(added)
    }

    pub fn lookup(&self, nid: u32) -> Option<&'static NativeFunction> {
        self.functions.get(&nid).map(|registered| registered.function)
    }

    pub fn module_of(&self, nid: u32) -> Option<&'static str> {
        self.functions.get(&nid).map(|registered| registered.module)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Marshals the arguments of `nid` out of `state` and runs its handler.
    pub fn dispatch(
        &self,
        nid: u32,
        ctx: &mut HleContext,
        state: &CpuState,
    ) -> Result<HleOutcome, RegistryError> {
        let function = self.lookup(nid).ok_or(RegistryError::UnknownNid(nid))?;
        let call = HleCall::from_state(function.signature, state);
        if ctx.config.trace_syscalls {
            tracing::info!(name = function.name, args = ?call, "syscall");
        }
        Ok((function.handler)(ctx, &call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferedAudio;
    use pretty_assertions::assert_eq;
    use pspemu_cpu::reg;
    use std::sync::Arc;

    fn echo(_ctx: &mut HleContext, call: &HleCall) -> HleOutcome {
        HleOutcome::Immediate(call.int(0) + call.int(1))
    }

    static MATH: &[NativeFunction] = &[
        NativeFunction {
            nid: 0x1000_0001,
            name: "add",
            firmware: 150,
            signature: Signature {
                ret: ArgKind::Int,
                params: &[ArgKind::Int, ArgKind::Int],
            },
            handler: echo,
        },
        NativeFunction {
            nid: 0x1000_0002,
            name: "addLater",
            firmware: 500,
            signature: Signature {
                ret: ArgKind::Int,
                params: &[ArgKind::Int, ArgKind::Int],
            },
            handler: echo,
        },
    ];

    static CLASH: &[NativeFunction] = &[NativeFunction {
        nid: 0x1000_0001,
        name: "sub",
        firmware: 150,
        signature: Signature {
            ret: ArgKind::Int,
            params: &[],
        },
        handler: echo,
    }];

    fn context() -> HleContext {
        HleContext::new(
            HleConfig {
                trace_syscalls: true,
                ..HleConfig::default()
            },
            GuestMemory::new(0x0880_0000, 0x1000),
            Arc::new(BufferedAudio::new()),
        )
    }

    #[test]
    fn firmware_filter_and_duplicates() {
        let mut registry = HleRegistry::new(150);
        assert_eq!(registry.register_module("Math", MATH).unwrap(), 1);
        assert!(registry.lookup(0x1000_0002).is_none());
        assert_eq!(registry.module_of(0x1000_0001), Some("Math"));

        assert_eq!(
            registry.register_module("Clash", CLASH),
            Err(RegistryError::DuplicateNid {
                nid: 0x1000_0001,
                name: "sub",
                existing: "add",
            })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[tracing_test::traced_test]
    fn dispatch_marshals_argument_registers() {
        let mut registry = HleRegistry::new(660);
        registry.register_module("Math", MATH).unwrap();
        let mut ctx = context();
        let mut state = CpuState::new();
        state.set_gpr(reg::A0, 40);
        state.set_gpr(reg::A0 + 1, 2);

        let outcome = registry.dispatch(0x1000_0002, &mut ctx, &state).unwrap();
        assert_eq!(outcome.immediate(), Some(42));
        assert!(logs_contain("addLater"));

        assert_eq!(
            registry.dispatch(0xdead_beef, &mut ctx, &state).unwrap_err(),
            RegistryError::UnknownNid(0xdead_beef)
        );
    }

    #[test]
    fn pointers_become_memory_views() {
        let mut memory = GuestMemory::new(0x0880_0000, 0x10);
        memory.write(0x0880_000c, &[1, 2, 3, 4]).unwrap();
        let signature = Signature {
            ret: ArgKind::Void,
            params: &[ArgKind::Ptr, ArgKind::Ptr, ArgKind::Ptr],
        };
        let call = HleCall::new(signature, &[0x0880_000c, 0, 0x1234]);

        assert_eq!(call.buffer(&memory, 0), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(call.buffer(&memory, 1), None);
        assert_eq!(call.buffer(&memory, 2), Some(&[][..]));
        assert_eq!(format!("{call:?}"), "[0x0880000c, 0x00000000, 0x00001234]");
    }
}
