// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Analog node support.
//!
//! Analog parts carry continuous-valued state and advance a fixed timestep
//! per tick - the board's sample period, threaded in explicitly through
//! [`crate::KernelConfig`] rather than read from ambient statics. Parts based
//! on differential equations integrate their state vector with a classic
//! fourth-order Runge–Kutta step; Euler is provided as a fallback for tests
//! that want hand-checkable arithmetic.

use bytes::Bytes;

use crate::connector::{Connector, ConnectorId};
use crate::node::{ContractError, NodeImpl};
use crate::signal::Signal;

/// Integration scheme for differential-equation parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrator {
    /// Classic fourth-order Runge–Kutta.
    #[default]
    RungeKutta4,
    /// Forward Euler. Less accurate; intended for tests.
    Euler,
}

/// Advances `state` by one step of size `dt` under `deriv`.
///
/// `deriv(t, y, dy)` writes the derivative of each state variable into `dy`.
/// The state vector length is the caller's contract; `dy` always arrives
/// zeroed with the same length as `y`.
pub fn integrate<F>(scheme: Integrator, deriv: &F, t: f64, dt: f64, state: &mut [f64])
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    let n = state.len();
    match scheme {
        Integrator::Euler => {
            let mut dy = vec![0.0; n];
            deriv(t, state, &mut dy);
            for i in 0..n {
                state[i] += dt * dy[i];
            }
        }
        Integrator::RungeKutta4 => {
            let mut k1 = vec![0.0; n];
            let mut k2 = vec![0.0; n];
            let mut k3 = vec![0.0; n];
            let mut k4 = vec![0.0; n];
            let mut tmp = vec![0.0; n];

            deriv(t, state, &mut k1);
            for i in 0..n {
                tmp[i] = state[i] + dt * k1[i] / 2.0;
            }
            deriv(t + dt / 2.0, &tmp, &mut k2);
            for i in 0..n {
                tmp[i] = state[i] + dt * k2[i] / 2.0;
            }
            deriv(t + dt / 2.0, &tmp, &mut k3);
            for i in 0..n {
                tmp[i] = state[i] + dt * k3[i];
            }
            deriv(t + dt, &tmp, &mut k4);
            for i in 0..n {
                state[i] += dt * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]) / 6.0;
            }
        }
    }
}

/// First-order RC low-pass: `dv/dt = (u - v) / (R·C)`.
///
/// One analog sink (`in`), one analog source (`out`). The output is the
/// capacitor voltage after the latest integration step.
#[derive(Debug)]
pub struct RcLowPass {
    rc: f64,
    dt: f64,
    scheme: Integrator,
    input: f64,
    v: f64,
    t: f64,
}

impl RcLowPass {
    /// A low-pass with time constant `rc` seconds, stepped at `sample_period`.
    #[must_use]
    pub fn new(rc: f64, sample_period: f64) -> Self {
        Self {
            rc,
            dt: sample_period,
            scheme: Integrator::RungeKutta4,
            input: 0.0,
            v: 0.0,
            t: 0.0,
        }
    }

    /// Switches the integration scheme (tests use Euler).
    #[must_use]
    pub fn with_integrator(mut self, scheme: Integrator) -> Self {
        self.scheme = scheme;
        self
    }

    /// Current capacitor voltage.
    #[must_use]
    pub fn voltage(&self) -> f64 {
        self.v
    }
}

impl NodeImpl for RcLowPass {
    fn class_tag(&self) -> &'static str {
        "rc_lowpass"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::sink("in"), Connector::source("out")]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        let u = self.input;
        let rc = self.rc;
        let deriv = move |_t: f64, y: &[f64], dy: &mut [f64]| {
            dy[0] = (u - y[0]) / rc;
        };
        let mut state = [self.v];
        integrate(self.scheme, &deriv, self.t, self.dt, &mut state);
        self.v = state[0];
        self.t += self.dt;
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        if conn.0 != 0 {
            return Err(ContractError::NotASink { conn });
        }
        // Digital drivers are legal on an analog sink: bit 0 maps to 0/1 V.
        self.input = value.as_analog().unwrap_or(f64::from(u8::from(value.is_high())));
        Ok(())
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::Analog(self.v))
    }

    fn state_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&self.input.to_bits().to_le_bytes());
        buf.extend_from_slice(&self.v.to_bits().to_le_bytes());
        buf.extend_from_slice(&self.t.to_bits().to_le_bytes());
        Bytes::from(buf)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 24] = bytes
            .try_into()
            .map_err(|_| ContractError::BadState {
                expected: 24,
                got: bytes.len(),
            })?;
        let word = |range: core::ops::Range<usize>| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&arr[range]);
            f64::from_bits(u64::from_le_bytes(w))
        };
        self.input = word(0..8);
        self.v = word(8..16);
        self.t = word(16..24);
        Ok(())
    }
}

/// Constant analog level driver.
#[derive(Debug)]
pub struct DcSource {
    level: f64,
    out: f64,
}

impl DcSource {
    /// A source driving `level` volts.
    #[must_use]
    pub fn new(level: f64) -> Self {
        Self { level, out: level }
    }
}

impl NodeImpl for DcSource {
    fn class_tag(&self) -> &'static str {
        "dc_source"
    }

    fn connectors(&self) -> Vec<Connector> {
        vec![Connector::source("out")]
    }

    fn tick(&mut self) -> Result<(), ContractError> {
        self.out = self.level;
        Ok(())
    }

    fn put(&mut self, conn: ConnectorId, _value: &Signal) -> Result<(), ContractError> {
        Err(ContractError::NotASink { conn })
    }

    fn read(&self, _conn: ConnectorId) -> Result<Signal, ContractError> {
        Ok(Signal::Analog(self.out))
    }

    fn state_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&self.level.to_bits().to_le_bytes());
        buf.extend_from_slice(&self.out.to_bits().to_le_bytes());
        Bytes::from(buf)
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ContractError::BadState {
                expected: 16,
                got: bytes.len(),
            })?;
        let mut w = [0u8; 8];
        w.copy_from_slice(&arr[0..8]);
        self.level = f64::from_bits(u64::from_le_bytes(w));
        w.copy_from_slice(&arr[8..16]);
        self.out = f64::from_bits(u64::from_le_bytes(w));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]

    use super::*;

    #[test]
    fn euler_step_matches_hand_arithmetic() {
        // dv/dt = (1 - v) / 1, v0 = 0, dt = 0.5 → v1 = 0.5
        let deriv = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = 1.0 - y[0];
        let mut state = [0.0];
        integrate(Integrator::Euler, &deriv, 0.0, 0.5, &mut state);
        assert_eq!(state[0], 0.5);
    }

    #[test]
    fn rk4_converges_toward_exponential_charge() {
        // v(t) = 1 - e^-t for rc = 1. One big RK4 step is already close.
        let deriv = |_t: f64, y: &[f64], dy: &mut [f64]| dy[0] = 1.0 - y[0];
        let mut state = [0.0];
        integrate(Integrator::RungeKutta4, &deriv, 0.0, 0.1, &mut state);
        let exact = 1.0 - (-0.1f64).exp();
        assert!((state[0] - exact).abs() < 1e-6);
    }

    #[test]
    fn rc_lowpass_charges_toward_input() {
        let mut lp = RcLowPass::new(0.001, 1.0 / 48_000.0);
        lp.put(ConnectorId(0), &Signal::Analog(1.0)).unwrap();
        for _ in 0..48 {
            lp.tick().unwrap();
        }
        let v = lp.voltage();
        assert!(v > 0.0 && v < 1.0, "charging, not settled: {v}");
        for _ in 0..48_000 {
            lp.tick().unwrap();
        }
        assert!((lp.voltage() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn rc_state_round_trips() {
        let mut lp = RcLowPass::new(0.01, 1.0 / 48_000.0);
        lp.put(ConnectorId(0), &Signal::Analog(0.7)).unwrap();
        lp.tick().unwrap();
        let blob = lp.state_bytes();
        let mut fresh = RcLowPass::new(0.01, 1.0 / 48_000.0);
        fresh.restore_state(&blob).unwrap();
        assert_eq!(fresh.state_bytes(), blob);
    }

    #[test]
    fn digital_drive_onto_analog_sink_maps_to_unit_level() {
        let mut lp = RcLowPass::new(1.0, 0.1);
        lp.put(ConnectorId(0), &Signal::bit(true)).unwrap();
        lp.tick().unwrap();
        assert!(lp.voltage() > 0.0);
    }
}
