// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Input-delay eye scan and calibration of the QDR controller.
//!
//! Calibration steps every input delay across its whole range, running the memory self-test
//! at each position. The per-line pass/fail record forms the eye of the line; the chosen tap
//! is the midpoint of its widest net-passing run. Four lines of the bus do not round-trip
//! through the memory window, so their taps are guessed as the median of the lines which do.
//! When the programmed taps do not yield a clean self-test, the scan is retried under
//! increasing output and output-clock delays.

use {
    super::{delay::QdrDelayOperation, memtest::QdrMemoryTest, *},
    tracing::debug,
};

/// The minimum width of a net-passing run considered robust against edge noise.
const ROBUST_AREA_MIN: i32 = 4;

/// Per-line pass/fail record of a full input-delay sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EyeMap {
    rows: [u32; EYE_SCAN_STEPS],
}

impl EyeMap {
    /// The fail mask of the self-test round taken with every input delay at `step` taps.
    pub fn fail_mask(&self, step: usize) -> u32 {
        self.rows[step]
    }

    /// The timeline of one observable line: +1 where the line passed, -1 where it failed.
    fn bit_timeline(&self, bit: usize) -> [i32; EYE_SCAN_STEPS] {
        let mut timeline = [0; EYE_SCAN_STEPS];
        self.rows.iter().enumerate().for_each(|(step, mask)| {
            timeline[step] = 1 - 2 * ((mask >> bit) & 1) as i32;
        });
        timeline
    }
}

/// The largest-sum contiguous run of the timeline, as (sum, begin index, end index). Of runs
/// with equal sum the one encountered last wins.
fn find_cal_area(area: &[i32]) -> (i32, usize, usize) {
    let mut max_so_far = area[0];
    let mut max_ending_here = area[0];
    let mut begin_index = 0;
    let mut begin_temp = 0;
    let mut end_index = 0;
    for (i, &value) in area.iter().enumerate() {
        if max_ending_here < 0 {
            max_ending_here = value;
            begin_temp = i;
        } else {
            max_ending_here += value;
        }
        if max_ending_here >= max_so_far {
            max_so_far = max_ending_here;
            begin_index = begin_temp;
            end_index = i;
        }
    }
    (max_so_far, begin_index, end_index)
}

/// The integer median of the given tap choices.
fn median_tap(taps: &[u8]) -> u8 {
    let mut sorted = taps.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        ((sorted[mid - 1] as u32 + sorted[mid] as u32) / 2) as u8
    } else {
        sorted[mid]
    }
}

/// Choose a tap per data line from the recorded eye.
///
/// The lines which cannot be observed through the memory window are assigned the median of
/// the observable choices, keeping the compensation rule in one place should the bus topology
/// ever change.
fn select_taps(eye: &EyeMap) -> Result<DelayVector, Error> {
    let mut cal_steps = [0; TOTAL_BITS];
    for bit in 0..OBSERVABLE_BITS {
        let timeline = eye.bit_timeline(bit);
        if timeline.iter().all(|&value| value > 0) {
            let label = format!("Calibration failed for bit {}, the eye has no edge", bit);
            return Err(Error::new(QdrCalError::BitNeverFailed, &label));
        }
        let (sum, begin, end) = find_cal_area(&timeline);
        if sum < ROBUST_AREA_MIN {
            let label = format!("Could not find a robust calibration setting for bit {}", bit);
            return Err(Error::new(QdrCalError::NoRobustTap, &label));
        }
        cal_steps[bit] = ((begin + end) / 2) as u8;
        debug!("selected tap for bit {}: {}", bit, cal_steps[bit]);
    }

    let median = median_tap(&cal_steps[..OBSERVABLE_BITS]);
    debug!("median taps: {}", median);
    cal_steps[OBSERVABLE_BITS..]
        .iter_mut()
        .for_each(|tap| *tap = median);

    Ok(cal_steps)
}

/// The selection mask of every line whose target tap lies beyond the given ramp step.
fn step_mask(delays: &DelayVector, step: u8) -> u64 {
    delays
        .iter()
        .enumerate()
        .filter(|(_, &tap)| step < tap)
        .fold(0, |mask, (bit, _)| mask | (1 << bit))
}

/// Calibration operation of the QDR controller.
pub trait QdrCalibration: QdrRegisterAccess + QdrDelayOperation + QdrMemoryTest {
    /// Sweep the input delays across their whole range, one self-test round per position, and
    /// choose a tap per data line from the recorded eye.
    ///
    /// The caller resets the controller immediately beforehand so the sweep starts from tap
    /// zero on every line.
    fn find_in_delays(&mut self) -> Result<DelayVector, Error> {
        let mut rows = [0; EYE_SCAN_STEPS];
        for step in 0..EYE_SCAN_STEPS {
            rows[step] = self.cal_check()?;
            debug!("step input delays to {}", step + 1);
            self.delay_in_step(ALL_BITS, 1)?;
        }

        let eye = EyeMap { rows };
        debug!("eye of the bus (0 is pass, 1 is fail):");
        for step in 0..EYE_SCAN_STEPS {
            debug!("\ttap step {:2}: {:032b}", step, eye.fail_mask(step));
        }

        select_taps(&eye)
    }

    /// Program the given delay configuration from a clean reset.
    ///
    /// The hardware only exposes a shared single-tap step pulse, so lines of differing target
    /// are ramped together and drop out of the selection mask as each reaches its own.
    fn apply_cals(
        &mut self,
        in_delays: &DelayVector,
        out_delays: &DelayVector,
        clk_delay: u8,
    ) -> Result<(), Error> {
        self.reset()?;
        self.delay_clk_step(clk_delay as i32)?;

        let max_in = in_delays.iter().copied().max().unwrap_or(0);
        for step in 0..max_in {
            let mask = step_mask(in_delays, step);
            debug!("step in {}: {:036b}", step, mask);
            self.delay_in_step(mask, 1)?;
        }

        let max_out = out_delays.iter().copied().max().unwrap_or(0);
        for step in 0..max_out {
            let mask = step_mask(out_delays, step);
            debug!("step out {}: {:036b}", step, mask);
            self.delay_out_step(mask, 1)?;
        }

        Ok(())
    }

    /// Calibrate the controller, stepping input delays and, if that does not hold, output
    /// delays. Leaves the controller untouched when the self-test already passes.
    ///
    /// Eye-scan failures abort the sweep and propagate; they indicate a controller which
    /// cannot be calibrated by stepping alone, not a transient condition worth retrying.
    fn calibrate(&mut self) -> Result<(), Error> {
        if self.cal_check()? == 0 {
            return Ok(());
        }

        let mut calibrated = false;
        let mut out_step = 0;
        while !calibrated && out_step < DELAY_TAP_COUNT {
            self.reset()?;
            let in_delays = self.find_in_delays()?;
            let out_delays = [out_step; TOTAL_BITS];
            self.apply_cals(&in_delays, &out_delays, out_step)?;
            calibrated = self.cal_check()? == 0;
            out_step += 1;
            let clk_tap = self.delay_clk_get()?;
            debug!("stepped output delays to {}, clock tap was {}", out_step, clk_tap);
        }

        if calibrated {
            Ok(())
        } else {
            Err(Error::new(
                QdrCalError::CalibrationFailed,
                "Calibration failed, the output-delay sweep is exhausted",
            ))
        }
    }
}

impl<A: QdrRegisterAccess> QdrCalibration for A {}
