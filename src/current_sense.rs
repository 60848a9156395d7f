//! Phase current measurement
//!
//! Implemented by platform code (ADC sampling synchronized to the PWM). The
//! voltage-mode control law never reads it; the motor only reports the
//! latest sample in its status.

/// Phase currents [A]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
}

/// Source of phase current samples
pub trait CurrentSense {
    /// Latest sample
    fn phase_currents(&mut self) -> PhaseCurrents;
}

impl<T: CurrentSense + ?Sized> CurrentSense for &mut T {
    fn phase_currents(&mut self) -> PhaseCurrents {
        (**self).phase_currents()
    }
}

/// Placeholder for boards without current sensing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCurrentSense;

impl CurrentSense for NoCurrentSense {
    fn phase_currents(&mut self) -> PhaseCurrents {
        PhaseCurrents::default()
    }
}
