//! Transparency measurements (`!measure [default]`)
//!
//! Timing statistics for CPUID and RDTSC taken on bare metal, before the
//! hypervisor is loaded. The command is deprecated but still stores its
//! results on the session.

use crate::session::Session;
use thiserror::Error;

const SAMPLE_COUNT: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeasureError {
    #[error("debugger is loaded and your machine is already in a hypervisor, 'unload' it and measure again or use '!measure default'")]
    DeviceLoaded,

    #[error("a hypervisor is present on this system, measurements would be wrong; use '!measure default' instead")]
    HypervisorDetected,

    #[error("timing measurements need an x86_64 host")]
    Unsupported,
}

/// Average, standard deviation and median of a set of cycle counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingStats {
    pub average: u64,
    pub standard_deviation: u64,
    pub median: u64,
}

impl TimingStats {
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len() as f64;
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / count;
        let variance = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / count;

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            let (low, high) = (sorted[mid - 1], sorted[mid]);
            low / 2 + high / 2 + (low % 2 + high % 2) / 2
        } else {
            sorted[mid]
        };

        Some(Self {
            average: mean.round() as u64,
            standard_deviation: variance.sqrt().round() as u64,
            median,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransparencyMeasurements {
    pub cpuid: TimingStats,
    pub rdtsc: TimingStats,
}

impl TransparencyMeasurements {
    /// Hard-coded values used by `!measure default`
    pub fn defaults() -> Self {
        Self {
            cpuid: TimingStats {
                average: 0x5f,
                standard_deviation: 0x10,
                median: 0x5f,
            },
            rdtsc: TimingStats {
                average: 0x16,
                standard_deviation: 0x5,
                median: 0x16,
            },
        }
    }
}

/// Run `!measure`; `use_defaults` selects `!measure default`
pub fn measure(session: &mut Session, use_defaults: bool) -> Result<TransparencyMeasurements, MeasureError> {
    log::warn!("'!measure' is deprecated, you should not use it anymore");

    let measurements = if use_defaults {
        TransparencyMeasurements::defaults()
    } else {
        if session.has_device() {
            return Err(MeasureError::DeviceLoaded);
        }
        sample()?
    };

    session.set_measurements(measurements);
    log::info!("the measurements were successful: {:?}", measurements);
    Ok(measurements)
}

#[cfg(target_arch = "x86_64")]
fn sample() -> Result<TransparencyMeasurements, MeasureError> {
    use std::arch::x86_64::{__cpuid, _rdtsc};

    // CPUID.1:ECX[31] is the hypervisor present bit
    let leaf1 = unsafe { __cpuid(1) };
    if (leaf1.ecx >> 31) & 1 == 1 {
        return Err(MeasureError::HypervisorDetected);
    }

    let cpuid: Vec<u64> = (0..SAMPLE_COUNT)
        .map(|_| unsafe {
            let start = _rdtsc();
            __cpuid(0);
            _rdtsc().wrapping_sub(start)
        })
        .collect();

    let rdtsc: Vec<u64> = (0..SAMPLE_COUNT)
        .map(|_| unsafe {
            let start = _rdtsc();
            _rdtsc().wrapping_sub(start)
        })
        .collect();

    Ok(TransparencyMeasurements {
        cpuid: TimingStats::from_samples(&cpuid).unwrap_or_default(),
        rdtsc: TimingStats::from_samples(&rdtsc).unwrap_or_default(),
    })
}

#[cfg(not(target_arch = "x86_64"))]
fn sample() -> Result<TransparencyMeasurements, MeasureError> {
    Err(MeasureError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let stats = TimingStats::from_samples(&[2, 4, 4, 4, 5, 5, 7, 9]).unwrap();
        assert_eq!(stats.average, 5);
        assert_eq!(stats.standard_deviation, 2);
        assert_eq!(stats.median, 4);

        assert_eq!(TimingStats::from_samples(&[7, 1, 3]).unwrap().median, 3);
        assert!(TimingStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_median_of_wrapped_deltas() {
        // Deltas taken across cores can wrap to values near u64::MAX
        let stats = TimingStats::from_samples(&[u64::MAX, u64::MAX - 2]).unwrap();
        assert_eq!(stats.median, u64::MAX - 1);

        let stats = TimingStats::from_samples(&[u64::MAX, u64::MAX]).unwrap();
        assert_eq!(stats.median, u64::MAX);
    }

    #[test]
    fn test_default_measurements_are_stored() {
        let mut session = Session::new();
        let measured = measure(&mut session, true).unwrap();
        assert_eq!(measured.cpuid.average, 0x5f);
        assert_eq!(measured.rdtsc.standard_deviation, 0x5);
        assert_eq!(session.measurements(), Some(&TransparencyMeasurements::defaults()));
    }
}
