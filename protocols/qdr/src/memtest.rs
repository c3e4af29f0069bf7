// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Memory self-test of the QDR controller.
//!
//! The test writes a battery of patterns into the memory window, reads them back, and
//! accumulates per data bit whether any word came back different. The battery mixes an
//! alternating stress pattern, a sparse single-word pattern, and four byte-lane ramps so that
//! each of the 32 observable lines toggles against both quiet and busy neighbours.

use {super::*, tracing::{debug, error}};

const fn alternating_pattern() -> [u32; 32] {
    let mut words = [0x55555555; 32];
    let mut i = 0;
    while i < words.len() {
        words[i] = 0xaaaaaaaa;
        i += 2;
    }
    words
}

const fn ramp_pattern(shift: u32) -> [u32; 256] {
    let mut words = [0; 256];
    let mut i = 0;
    while i < words.len() {
        words[i] = (i as u32) << shift;
        i += 1;
    }
    words
}

const ALTERNATING: [u32; 32] = alternating_pattern();
const SPARSE: [u32; 8] = [0, 0, 0xffffffff, 0, 0, 0, 0, 0];
const RAMP_BYTE0: [u32; 256] = ramp_pattern(0);
const RAMP_BYTE1: [u32; 256] = ramp_pattern(8);
const RAMP_BYTE2: [u32; 256] = ramp_pattern(16);
const RAMP_BYTE3: [u32; 256] = ramp_pattern(24);

/// The battery of test patterns exercised by one round of the memory self-test, in order.
pub const CALIBRATION_DATA: [&[u32]; 6] = [
    &ALTERNATING,
    &SPARSE,
    &RAMP_BYTE0,
    &RAMP_BYTE1,
    &RAMP_BYTE2,
    &RAMP_BYTE3,
];

fn read_back_words<A: QdrRegisterAccess + ?Sized>(
    access: &mut A,
    count: usize,
) -> Result<Vec<u32>, Error> {
    let data = access.mem_read(count * 4)?;
    if data.len() != count * 4 {
        let label = format!("Needed {} bytes, got {}", count * 4, data.len());
        return Err(Error::new(QdrCalError::ReadShort, &label));
    }
    let words = data
        .chunks_exact(4)
        .map(|quadlet| {
            let mut frame = [0; 4];
            frame.copy_from_slice(quadlet);
            u32::from_be_bytes(frame)
        })
        .collect();
    Ok(words)
}

/// Memory self-test operation of the QDR controller.
pub trait QdrMemoryTest: QdrRegisterAccess {
    /// Run the pattern battery through the memory window once and accumulate, per data bit,
    /// whether any word of any pattern read back different. A zero mask means every bit
    /// passed the round.
    ///
    /// A short readback marks the whole round as failed on every bit instead of raising.
    fn cal_check(&mut self) -> Result<u32, Error> {
        let mut pattern_fail = 0;
        for pattern in &CALIBRATION_DATA {
            let mut bytes = Vec::with_capacity(pattern.len() * 4);
            pattern
                .iter()
                .for_each(|word| bytes.extend_from_slice(&word.to_be_bytes()));
            self.mem_write(&bytes)?;
            let words = match read_back_words(self, pattern.len()) {
                Ok(words) => words,
                Err(e) if e.kind::<QdrCalError>() == Some(QdrCalError::ReadShort) => {
                    error!("{}", e);
                    return Ok(u32::MAX);
                }
                Err(e) => return Err(e),
            };
            pattern
                .iter()
                .zip(&words)
                .for_each(|(written, read)| pattern_fail |= written ^ read);
        }
        if pattern_fail > 0 {
            debug!("memory self-test failed: 0b{:032b}", pattern_fail);
        }
        Ok(pattern_fail)
    }
}

impl<A: QdrRegisterAccess> QdrMemoryTest for A {}

#[cfg(test)]
mod test {
    use super::*;

    struct MemAccess {
        memory: Vec<u8>,
        corrupt_mask: u32,
        truncate_to: Option<usize>,
    }

    impl MemAccess {
        fn new() -> Self {
            MemAccess {
                memory: Vec::new(),
                corrupt_mask: 0,
                truncate_to: None,
            }
        }
    }

    impl QdrRegisterAccess for MemAccess {
        fn ctrl_write(&mut self, _: usize, _: u32) -> Result<(), Error> {
            unreachable!();
        }

        fn ctrl_read(&mut self, _: usize) -> Result<u32, Error> {
            unreachable!();
        }

        fn mem_write(&mut self, bytes: &[u8]) -> Result<(), Error> {
            self.memory = bytes.to_vec();
            Ok(())
        }

        fn mem_read(&mut self, count: usize) -> Result<Vec<u8>, Error> {
            let mut data: Vec<u8> = self
                .memory
                .chunks_exact(4)
                .flat_map(|quadlet| {
                    let mut frame = [0; 4];
                    frame.copy_from_slice(quadlet);
                    (u32::from_be_bytes(frame) ^ self.corrupt_mask)
                        .to_be_bytes()
                        .to_vec()
                })
                .collect();
            data.truncate(self.truncate_to.unwrap_or(count));
            Ok(data)
        }
    }

    #[test]
    fn battery_shape() {
        assert_eq!(CALIBRATION_DATA.len(), 6);
        assert_eq!(CALIBRATION_DATA[0].len(), 32);
        assert_eq!(CALIBRATION_DATA[1].len(), 8);
        CALIBRATION_DATA[2..]
            .iter()
            .for_each(|pattern| assert_eq!(pattern.len(), 256));
    }

    #[test]
    fn battery_contents() {
        assert_eq!(CALIBRATION_DATA[0][0], 0xaaaaaaaa);
        assert_eq!(CALIBRATION_DATA[0][1], 0x55555555);
        assert_eq!(CALIBRATION_DATA[0][30], 0xaaaaaaaa);
        assert_eq!(CALIBRATION_DATA[0][31], 0x55555555);

        assert_eq!(CALIBRATION_DATA[1][2], 0xffffffff);
        assert_eq!(CALIBRATION_DATA[1].iter().sum::<u32>(), 0xffffffff);

        assert_eq!(CALIBRATION_DATA[2][255], 255);
        assert_eq!(CALIBRATION_DATA[3][1], 1 << 8);
        assert_eq!(CALIBRATION_DATA[4][128], 128 << 16);
        assert_eq!(CALIBRATION_DATA[5][255], 255 << 24);
    }

    #[test]
    fn cal_check_round_trip() {
        let mut access = MemAccess::new();
        assert_eq!(access.cal_check().unwrap(), 0);
    }

    #[test]
    fn cal_check_accumulates_corrupt_bits() {
        let mut access = MemAccess::new();
        access.corrupt_mask = (1 << 5) | (1 << 31);
        assert_eq!(access.cal_check().unwrap(), (1 << 5) | (1 << 31));
    }

    #[test]
    fn cal_check_short_read() {
        let mut access = MemAccess::new();
        access.truncate_to = Some(16);
        assert_eq!(access.cal_check().unwrap(), u32::MAX);
    }
}
