use std::fmt;

pub const GPR_COUNT: usize = 32;

/// Allegrex general purpose register indices used by the HLE layer.
pub mod reg {
    pub const ZERO: usize = 0;
    pub const V0: usize = 2;
    pub const V1: usize = 3;
    pub const A0: usize = 4;
    pub const T3: usize = 11;
    pub const SP: usize = 29;
    pub const RA: usize = 31;
}

/// Snapshot of every guest-visible register.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub gpr: [u32; GPR_COUNT],
    pub pc: u32,
    pub hi: u32,
    pub lo: u32,
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Registers");
        s.field("pc", &format_args!("{:#010x}", self.pc));
        for (index, value) in self.gpr.iter().enumerate().filter(|(_, v)| **v != 0) {
            s.field(&format!("r{index}"), &format_args!("{value:#010x}"));
        }
        s.field("hi", &format_args!("{:#010x}", self.hi))
            .field("lo", &format_args!("{:#010x}", self.lo))
            .finish()
    }
}

/// Register file of one guest thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuState {
    registers: Registers,
}

impl CpuState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gpr(&self, index: usize) -> u32 {
        self.registers.gpr[index]
    }

    /// Writes to `$zero` are discarded, as on hardware.
    pub fn set_gpr(&mut self, index: usize, value: u32) {
        if index != reg::ZERO {
            self.registers.gpr[index] = value;
        }
    }

    pub fn pc(&self) -> u32 {
        self.registers.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.registers.pc = pc;
    }

    pub fn ra(&self) -> u32 {
        self.registers.gpr[reg::RA]
    }

    pub fn set_ra(&mut self, ra: u32) {
        self.registers.gpr[reg::RA] = ra;
    }

    pub fn hi(&self) -> u32 {
        self.registers.hi
    }

    pub fn set_hi(&mut self, value: u32) {
        self.registers.hi = value;
    }

    pub fn lo(&self) -> u32 {
        self.registers.lo
    }

    pub fn set_lo(&mut self, value: u32) {
        self.registers.lo = value;
    }

    /// `(v0, v1)`
    pub fn return_values(&self) -> (u32, u32) {
        (self.gpr(reg::V0), self.gpr(reg::V1))
    }

    pub fn set_return_values(&mut self, (v0, v1): (u32, u32)) {
        self.set_gpr(reg::V0, v0);
        self.set_gpr(reg::V1, v1);
    }

    /// Stores an HLE call result in `v0`.
    pub fn set_return_value(&mut self, value: i32) {
        self.set_gpr(reg::V0, value as u32);
    }

    /// The `index`th integer argument register, starting at `a0`.
    pub fn argument(&self, index: usize) -> u32 {
        self.gpr(reg::A0 + index)
    }

    pub fn snapshot(&self) -> Registers {
        self.registers
    }

    pub fn restore(&mut self, registers: &Registers) {
        self.registers = *registers;
    }
}
