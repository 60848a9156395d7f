// Coordinate transformations for FOC (Field Oriented Control)
// Inverse Park transform and angle helpers

use core::f32::consts::{PI, TAU};
use libm::{cosf, fmodf, sinf, sqrtf};

/// Voltage command in the rotor frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DqVoltage {
    /// Flux axis [V]
    pub d: f32,
    /// Torque axis [V]
    pub q: f32,
}

impl DqVoltage {
    pub const ZERO: Self = Self { d: 0.0, q: 0.0 };

    pub const fn new(q: f32, d: f32) -> Self {
        Self { d, q }
    }
}

/// Voltage in the stationary two-phase frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlphaBetaVoltage {
    pub alpha: f32,
    pub beta: f32,
}

/// Sine/cosine back-end used by the modulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrigMode {
    /// `idsp::cossin` fixed-point lookup (~40 cycles on Cortex-M)
    #[default]
    Fast,
    /// `libm` sinf/cosf (~100-200 cycles)
    Exact,
}

impl TrigMode {
    pub const fn from_fast(fast: bool) -> Self {
        if fast {
            Self::Fast
        } else {
            Self::Exact
        }
    }

    /// Returns `(cos, sin)` of `theta`
    #[inline]
    pub fn cos_sin(self, theta: f32) -> (f32, f32) {
        match self {
            Self::Fast => cos_sin_idsp(theta),
            Self::Exact => (cosf(theta), sinf(theta)),
        }
    }
}

#[inline]
fn cos_sin_idsp(theta: f32) -> (f32, f32) {
    // idsp phase spans i32::MIN..=i32::MAX for -π..π
    let theta = normalize_angle(theta);
    let centered = if theta > PI { theta - TAU } else { theta };

    const SCALE: f32 = 2147483648.0 / PI; // 2^31 / π
    let phase = (centered * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F32: f32 = 1.0 / 2147483648.0; // 1 / 2^31
    (cos_i32 as f32 * I32_TO_F32, sin_i32 as f32 * I32_TO_F32)
}

/// Inverse Park transformation (dq → αβ)
///
/// ```text
/// Ualpha = cos(θ)·Ud − sin(θ)·Uq
/// Ubeta  = sin(θ)·Ud + cos(θ)·Uq
/// ```
///
/// `theta` is the electrical angle in radians, taken modulo 2π.
pub fn inverse_park(voltage: DqVoltage, theta: f32, trig: TrigMode) -> AlphaBetaVoltage {
    let (cos_theta, sin_theta) = trig.cos_sin(theta);

    AlphaBetaVoltage {
        alpha: cos_theta * voltage.d - sin_theta * voltage.q,
        beta: sin_theta * voltage.d + cos_theta * voltage.q,
    }
}

/// Limit the dq voltage vector to `max_voltage` magnitude
///
/// Both components are scaled by the same factor so the vector keeps its
/// direction.
pub fn limit_voltage(voltage: DqVoltage, max_voltage: f32) -> DqVoltage {
    let magnitude = sqrtf(voltage.d * voltage.d + voltage.q * voltage.q);

    if magnitude > max_voltage {
        let scale = max_voltage / magnitude;
        DqVoltage {
            d: voltage.d * scale,
            q: voltage.q * scale,
        }
    } else {
        voltage
    }
}

/// Normalize angle to range [0, 2π)
pub fn normalize_angle(angle: f32) -> f32 {
    let normalized = fmodf(angle, TAU);
    if normalized < 0.0 {
        // -ε + 2π rounds to exactly 2π for tiny ε
        let wrapped = normalized + TAU;
        if wrapped >= TAU {
            0.0
        } else {
            wrapped
        }
    } else {
        normalized
    }
}

/// Electrical angle of a shaft angle, not normalized
#[inline]
pub fn electrical_angle(shaft_angle: f32, pole_pairs: u32) -> f32 {
    shaft_angle * pole_pairs as f32
}

/// -1.0, 0.0 or 1.0
#[inline]
pub(crate) fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}
