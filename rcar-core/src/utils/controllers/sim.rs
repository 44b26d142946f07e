//! Simulated expansion board.
//!
//! `SimulatedShieldBus` is an in-memory `embedded_hal::i2c::I2c` device that
//! answers like the expansion board: it stores register writes and serves
//! echo-time reads for a configurable obstacle distance. A [`SimHandle`]
//! shares the same state so the owner can inspect registers and inject
//! faults while the bus itself lives inside a [`super::ShieldDriver`].

use std::sync::Arc;

use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation};
use parking_lot::Mutex;

use super::shield::{reg, SHIELD_ADDRESS};

/// Number of 16-bit registers the board exposes (`SERVO1..=SONIC`).
const REGISTER_COUNT: usize = reg::SONIC as usize + 1;

/// Errors produced by the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SimBusError {
    #[error("no device acknowledged address 0x{0:02X}")]
    AddressNack(u8),
    #[error("injected bus fault")]
    Fault,
}

impl i2c::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        match self {
            SimBusError::AddressNack(_) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            SimBusError::Fault => ErrorKind::Bus,
        }
    }
}

#[derive(Debug)]
struct SimState {
    address: u8,
    registers: [u16; REGISTER_COUNT],
    pointer: u8,
    echo_us: u16,
    no_echo: bool,
    fault: bool,
    writes: u64,
}

impl SimState {
    fn power_on() -> Self {
        let mut registers = [0u16; REGISTER_COUNT];
        for servo in reg::SERVO1..=reg::SERVO4 {
            registers[servo as usize] = 1500;
        }
        // LEDs are active-low
        for io in reg::IO1..=reg::IO3 {
            registers[io as usize] = 1;
        }
        Self {
            address: SHIELD_ADDRESS,
            registers,
            pointer: 0,
            echo_us: cm_to_echo(50.0),
            no_echo: false,
            fault: false,
            writes: 0,
        }
    }

    fn write(
        &mut self,
        bytes: &[u8],
    ) {
        let Some((&register, value)) = bytes.split_first() else {
            // address probe
            return;
        };
        self.pointer = register;
        if let [hi, lo] = *value {
            let value = u16::from_be_bytes([hi, lo]);
            self.writes += 1;
            match register {
                r if usize::from(r) < reg::SONIC as usize => self.registers[usize::from(r)] = value,
                reg::ADDRESS if value >> 8 == 0xBB => self.address = ((value & 0xFF) >> 1) as u8,
                r => tracing::trace!(register = r, value, "write to read-only register ignored"),
            }
        }
    }

    fn read(
        &self,
        buffer: &mut [u8],
    ) {
        let echo = if self.no_echo { 0 } else { self.echo_us };
        let [hi, lo] = echo.to_be_bytes();
        let byte = match self.pointer {
            p if p == reg::SONIC => hi,
            p if p == reg::SONIC + 1 => lo,
            _ => 0,
        };
        buffer.fill(byte);
    }
}

fn cm_to_echo(cm: f32) -> u16 {
    (cm.max(0.0) * 1000.0 / 17.0).round().min(f32::from(u16::MAX)) as u16
}

/// In-memory I2C bus with the expansion board attached.
#[derive(Debug)]
pub struct SimulatedShieldBus {
    state: Arc<Mutex<SimState>>,
}

/// Inspection and fault-injection handle onto a [`SimulatedShieldBus`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedShieldBus {
    /// A board in its power-on state with an obstacle 50 cm away.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::power_on())),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedShieldBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHandle {
    /// Current value of a board register.
    pub fn register(
        &self,
        register: u8,
    ) -> u16 {
        self.state
            .lock()
            .registers
            .get(usize::from(register))
            .copied()
            .unwrap_or(0)
    }

    /// Address the board currently answers on.
    pub fn address(&self) -> u8 {
        self.state.lock().address
    }

    /// Place the simulated obstacle `cm` centimeters away.
    pub fn set_distance(
        &self,
        cm: f32,
    ) {
        self.state.lock().echo_us = cm_to_echo(cm);
    }

    /// Make the ultrasonic sensor return no echo.
    pub fn set_no_echo(
        &self,
        no_echo: bool,
    ) {
        self.state.lock().no_echo = no_echo;
    }

    /// Fail every subsequent bus transaction.
    pub fn set_fault(
        &self,
        fault: bool,
    ) {
        self.state.lock().fault = fault;
    }

    /// Register writes seen so far.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }
}

impl i2c::ErrorType for SimulatedShieldBus {
    type Error = SimBusError;
}

impl I2c for SimulatedShieldBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.fault {
            return Err(SimBusError::Fault);
        }
        if address != state.address {
            return Err(SimBusError::AddressNack(address));
        }
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => state.write(bytes),
                Operation::Read(buffer) => state.read(buffer),
            }
        }
        Ok(())
    }
}
