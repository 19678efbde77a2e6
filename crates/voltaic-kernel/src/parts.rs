// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Built-in digital part catalog.
//!
//! The kernel keeps this catalog to the abstract-contract minimum: enough
//! parts to build and test real boards (constants, the basic gates, a
//! register, a probe) without committing to any component family's numerics.
//! Every part follows the same shape: latched inputs written by `put`,
//! outputs recomputed by `tick`, a fixed connector table declared sinks
//! first, and a flat canonical state blob.

use bytes::Bytes;

use crate::connector::{Connector, ConnectorId};
use crate::node::{ContractError, NodeImpl};
use crate::signal::Signal;

fn bad_state(expected: usize, got: usize) -> ContractError {
    ContractError::BadState { expected, got }
}

/// Constant bit-pattern driver. One source connector, no sinks.
#[derive(Debug)]
pub struct Constant {
    value: u64,
    width: u8,
    out: u64,
}

impl Constant {
    /// A constant driving `value` at `width` bits.
    #[must_use]
    pub fn new(value: u64, width: u8) -> Self {
        let masked = if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        };
        Self {
            value: masked,
            width,
            out: masked,
        }
    }
}

impl NodeImpl for Constant {
    fn class_tag(&self) -> &'static str {
        "constant"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::source("out").with_width(self.width)]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        self.out = self.value;
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, _value: &Signal) -> Result<(), ContractError> {
        Err(ContractError::NotASink { conn })
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::bits(self.out, self.width))
    }

    fn state_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(9);
        buf.extend_from_slice(&self.out.to_le_bytes());
        buf.push(self.width);
        Bytes::from(buf)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 9] = bytes.try_into().map_err(|_| bad_state(9, bytes.len()))?;
        let mut v = [0u8; 8];
        v.copy_from_slice(&arr[..8]);
        self.out = u64::from_le_bytes(v);
        self.width = arr[8];
        Ok(())
    }
}

macro_rules! two_input_gate {
    ($name:ident, $tag:literal, $op:expr) => {
        /// Two-input single-bit gate; output lags inputs by one tick.
        #[derive(Debug, Default)]
        pub struct $name {
            a: bool,
            b: bool,
            out: bool,
        }

        impl $name {
            /// A gate with both inputs low.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }
        }

        impl NodeImpl for $name {
            fn class_tag(&self) -> &'static str {
                $tag
            }

            fn connectors(&self) -> Vec<Connector> {
                vec![
                    Connector::sink("a"),
                    Connector::sink("b"),
                    Connector::source("out"),
                ]
            }

            fn tick(&mut self) -> Result<(), ContractError> {
                let f: fn(bool, bool) -> bool = $op;
                self.out = f(self.a, self.b);
                Ok(())
            }

            fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
                match conn.0 {
                    0 => self.a = value.is_high(),
                    1 => self.b = value.is_high(),
                    _ => return Err(ContractError::NotASink { conn }),
                }
                Ok(())
            }

            fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
                Ok(Signal::bit(self.out))
            }

            fn state_bytes(&self) -> Bytes {
                Bytes::from(vec![
                    u8::from(self.a),
                    u8::from(self.b),
                    u8::from(self.out),
                ])
            }

            fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
                let arr: [u8; 3] = bytes.try_into().map_err(|_| bad_state(3, bytes.len()))?;
                self.a = arr[0] != 0;
                self.b = arr[1] != 0;
                self.out = arr[2] != 0;
                Ok(())
            }
        }
    };
}

two_input_gate!(AndGate, "and", |a, b| a && b);
two_input_gate!(OrGate, "or", |a, b| a || b);
two_input_gate!(XorGate, "xor", |a, b| a ^ b);

/// Single-bit pass-through. Like every node it adds one tick of delay.
#[derive(Debug, Default)]
pub struct Buffer {
    input: bool,
    out: bool,
}

impl Buffer {
    /// A buffer with its input low.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeImpl for Buffer {
    fn class_tag(&self) -> &'static str {
        "buffer"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::sink("in"), Connector::source("out")]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        self.out = self.input;
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        match conn.0 {
            0 => {
                self.input = value.is_high();
                Ok(())
            }
            _ => Err(ContractError::NotASink { conn }),
        }
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::bit(self.out))
    }

    fn state_bytes(&self) -> Bytes {
        Bytes::from(vec![u8::from(self.input), u8::from(self.out)])
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 2] = bytes.try_into().map_err(|_| bad_state(2, bytes.len()))?;
        self.input = arr[0] != 0;
        self.out = arr[1] != 0;
        Ok(())
    }
}

/// Single-bit inverter.
#[derive(Debug, Default)]
pub struct NotGate {
    input: bool,
    out: bool,
}

impl NotGate {
    /// An inverter with its input low (output goes high on first tick).
    #[must_use]
    pub fn new() -> Self {
        Self {
            input: false,
            out: false,
        }
    }
}

impl NodeImpl for NotGate {
    fn class_tag(&self) -> &'static str {
        "not"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::sink("in"), Connector::source("out")]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        self.out = !self.input;
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        match conn.0 {
            0 => {
                self.input = value.is_high();
                Ok(())
            }
            _ => Err(ContractError::NotASink { conn }),
        }
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::bit(self.out))
    }

    fn state_bytes(&self) -> Bytes {
        Bytes::from(vec![u8::from(self.input), u8::from(self.out)])
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 2] = bytes.try_into().map_err(|_| bad_state(2, bytes.len()))?;
        self.input = arr[0] != 0;
        self.out = arr[1] != 0;
        Ok(())
    }
}

/// One-tick latch with enable and clear.
///
/// Clear wins over enable. The one-pass evaluation model already provides
/// edge-like semantics (outputs computed from previously latched inputs), so
/// no explicit clock pin is modeled at the kernel level.
#[derive(Debug)]
pub struct RegisterBit {
    d: bool,
    en: bool,
    clr: bool,
    q: bool,
}

impl RegisterBit {
    /// An enabled, cleared register.
    #[must_use]
    pub fn new() -> Self {
        Self {
            d: false,
            en: true,
            clr: false,
            q: false,
        }
    }
}

impl Default for RegisterBit {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeImpl for RegisterBit {
    fn class_tag(&self) -> &'static str {
        "register"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![
            Connector::sink("d"),
            Connector::sink("en"),
            Connector::sink("clr"),
            Connector::source("q"),
        ]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        if self.clr {
            self.q = false;
        } else if self.en {
            self.q = self.d;
        }
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        match conn.0 {
            0 => self.d = value.is_high(),
            1 => self.en = value.is_high(),
            2 => self.clr = value.is_high(),
            _ => return Err(ContractError::NotASink { conn }),
        }
        Ok(())
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::bit(self.q))
    }

    fn state_bytes(&self) -> Bytes {
        Bytes::from(vec![
            u8::from(self.d),
            u8::from(self.en),
            u8::from(self.clr),
            u8::from(self.q),
        ])
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 4] = bytes.try_into().map_err(|_| bad_state(4, bytes.len()))?;
        self.d = arr[0] != 0;
        self.en = arr[1] != 0;
        self.clr = arr[2] != 0;
        self.q = arr[3] != 0;
        Ok(())
    }
}

/// Records the last value latched on its input, and how many arrived.
///
/// Probes are observation points: boards and tests read them back through
/// [`Probe::last`] on the concrete type, not through the link fabric.
#[derive(Debug, Default)]
pub struct Probe {
    last: Option<Signal>,
    observed: u64,
}

impl Probe {
    /// A probe that has seen nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently latched value, if any.
    #[must_use]
    pub fn last(&self) -> Option<Signal> {
        self.last
    }

    /// Total number of values latched.
    #[must_use]
    pub fn observed(&self) -> u64 {
        self.observed
    }
}

impl NodeImpl for Probe {
    fn class_tag(&self) -> &'static str {
        "probe"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::sink("in").with_multi(true)]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        if conn.0 != 0 {
            return Err(ContractError::NotASink { conn });
        }
        self.last = Some(*value);
        self.observed += 1;
        Ok(())
    }

    fn read(&self, conn: ConnectorId) -> Result<Signal, ContractError> {
        Err(ContractError::NotASource { conn })
    }

    fn state_bytes(&self) -> Bytes {
        // tag (0 none / 1 bits / 2 analog), payload u64, width, observed u64
        let mut buf = Vec::with_capacity(18);
        match self.last {
            None => {
                buf.push(0);
                buf.extend_from_slice(&0u64.to_le_bytes());
                buf.push(0);
            }
            Some(Signal::Bits { value, width }) => {
                buf.push(1);
                buf.extend_from_slice(&value.to_le_bytes());
                buf.push(width);
            }
            Some(Signal::Analog(v)) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_bits().to_le_bytes());
                buf.push(0);
            }
        }
        buf.extend_from_slice(&self.observed.to_le_bytes());
        Bytes::from(buf)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 18] = bytes.try_into().map_err(|_| bad_state(18, bytes.len()))?;
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&arr[1..9]);
        let raw = u64::from_le_bytes(payload);
        self.last = match arr[0] {
            0 => None,
            1 => Some(Signal::Bits {
                value: raw,
                width: arr[9],
            }),
            2 => Some(Signal::Analog(f64::from_bits(raw))),
            _ => return Err(bad_state(18, bytes.len())),
        };
        let mut obs = [0u8; 8];
        obs.copy_from_slice(&arr[10..18]);
        self.observed = u64::from_le_bytes(obs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn xor_recomputes_from_latched_inputs() {
        let mut g = XorGate::new();
        g.put(ConnectorId(0), &Signal::bit(true)).unwrap();
        g.put(ConnectorId(1), &Signal::bit(false)).unwrap();
        g.tick().unwrap();
        assert_eq!(g.read(ConnectorId(2)).unwrap(), Signal::bit(true));
        // Idempotent without new inputs.
        g.tick().unwrap();
        assert_eq!(g.read(ConnectorId(2)).unwrap(), Signal::bit(true));
    }

    #[test]
    fn register_clear_wins_over_enable() {
        let mut r = RegisterBit::new();
        r.put(ConnectorId(0), &Signal::bit(true)).unwrap();
        r.tick().unwrap();
        assert_eq!(r.read(ConnectorId(3)).unwrap(), Signal::bit(true));
        r.put(ConnectorId(2), &Signal::bit(true)).unwrap();
        r.tick().unwrap();
        assert_eq!(r.read(ConnectorId(3)).unwrap(), Signal::bit(false));
    }

    #[test]
    fn register_holds_when_disabled() {
        let mut r = RegisterBit::new();
        r.put(ConnectorId(0), &Signal::bit(true)).unwrap();
        r.tick().unwrap();
        r.put(ConnectorId(1), &Signal::bit(false)).unwrap();
        r.put(ConnectorId(0), &Signal::bit(false)).unwrap();
        r.tick().unwrap();
        assert_eq!(r.read(ConnectorId(3)).unwrap(), Signal::bit(true));
    }

    #[test]
    fn state_blobs_round_trip() {
        let mut g = AndGate::new();
        g.put(ConnectorId(0), &Signal::bit(true)).unwrap();
        g.put(ConnectorId(1), &Signal::bit(true)).unwrap();
        g.tick().unwrap();
        let blob = g.state_bytes();
        let mut h = AndGate::new();
        h.restore_state(&blob).unwrap();
        assert_eq!(h.state_bytes(), blob);
    }

    #[test]
    fn restore_rejects_wrong_size() {
        let mut g = OrGate::new();
        let err = g.restore_state(&[1, 2]).unwrap_err();
        assert!(matches!(err, ContractError::BadState { expected: 3, got: 2 }));
    }

    #[test]
    fn probe_counts_and_remembers() {
        let mut p = Probe::new();
        p.put(ConnectorId(0), &Signal::bits(0b101, 3)).unwrap();
        p.put(ConnectorId(0), &Signal::Analog(0.25)).unwrap();
        assert_eq!(p.observed(), 2);
        assert_eq!(p.last(), Some(Signal::Analog(0.25)));
        let blob = p.state_bytes();
        let mut q = Probe::new();
        q.restore_state(&blob).unwrap();
        assert_eq!(q.state_bytes(), blob);
    }
}
