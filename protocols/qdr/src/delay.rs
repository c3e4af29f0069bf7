// SPDX-License-Identifier: LGPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Delay-line stepping protocol of the QDR controller.
//!
//! The controller keeps one programmable delay per data line plus one for the output clock,
//! and none of them can be written directly. A tap is applied by latching the stepping
//! direction at word offset 7, then pulsing a strobe which the fabric edge-detects. The data
//! words at offsets 4 (input) and 6 (output) carry the low 32 lines of the selection, the
//! strobe word at offset 5 carries lines 32..35 in its low nibbles plus the clock strobe at
//! bit 8. The writes of a pulse reach the hardware in order and must not be merged.

use super::*;

/// Word offset of the reset bit (bit 0, rising edge clears all taps).
const CTRL_OFFSET_RESET: usize = 0;
/// Word offset of the input-delay selection for lines 0..31.
const CTRL_OFFSET_IN_DATA: usize = 4;
/// Word offset of the strobe word. Nibble 0 selects input-delay lines 32..35, nibble 1
/// selects output-delay lines 32..35, bit 8 strobes the clock delay.
const CTRL_OFFSET_STROBE: usize = 5;
/// Word offset of the output-delay selection for lines 0..31.
const CTRL_OFFSET_OUT_DATA: usize = 6;
/// Word offset of the direction latch; all-ones increments, all-zeros decrements.
const CTRL_OFFSET_DIRECTION: usize = 7;
/// Word offset of the clock-tap readback counter.
const CTRL_OFFSET_CLK_COUNT: usize = 8;

const CLK_STROBE: u32 = 1 << 8;
const CLK_COUNT_MASK: u32 = 0x1f;

fn latch_direction<A: QdrRegisterAccess + ?Sized>(access: &mut A, step: i32) -> Result<(), Error> {
    if step > 0 {
        access.ctrl_write(CTRL_OFFSET_DIRECTION, 0xffffffff)
    } else {
        access.ctrl_write(CTRL_OFFSET_DIRECTION, 0)
    }
}

fn delay_data_step<A: QdrRegisterAccess + ?Sized>(
    access: &mut A,
    data_offset: usize,
    bitmask: u64,
    strobe: u32,
    step: i32,
) -> Result<(), Error> {
    if step == 0 {
        return Ok(());
    }
    latch_direction(access, step)?;
    for _ in 0..step.abs() {
        access.ctrl_write(data_offset, 0)?;
        access.ctrl_write(CTRL_OFFSET_STROBE, 0)?;
        access.ctrl_write(data_offset, bitmask as u32)?;
        access.ctrl_write(CTRL_OFFSET_STROBE, strobe)?;
    }
    Ok(())
}

/// Stepping operation for the delay lines of the QDR controller.
pub trait QdrDelayOperation: QdrRegisterAccess {
    /// Reset the controller by toggling the lsb of the control register. Returns every delay
    /// line to tap zero.
    fn reset(&mut self) -> Result<(), Error> {
        self.ctrl_write(CTRL_OFFSET_RESET, 1)?;
        self.ctrl_write(CTRL_OFFSET_RESET, 0)
    }

    /// Step the input delay of every line selected by the 36-bit bitmask by `step` taps,
    /// decrementing when `step` is negative.
    fn delay_in_step(&mut self, bitmask: u64, step: i32) -> Result<(), Error> {
        let strobe = 0xf & (bitmask >> 32) as u32;
        delay_data_step(self, CTRL_OFFSET_IN_DATA, bitmask, strobe, step)
    }

    /// Step the output delay of every line selected by the 36-bit bitmask by `step` taps,
    /// decrementing when `step` is negative.
    fn delay_out_step(&mut self, bitmask: u64, step: i32) -> Result<(), Error> {
        let strobe = (0xf & (bitmask >> 32) as u32) << 4;
        delay_data_step(self, CTRL_OFFSET_OUT_DATA, bitmask, strobe, step)
    }

    /// Step the output clock delay by `step` taps, decrementing when `step` is negative.
    fn delay_clk_step(&mut self, step: i32) -> Result<(), Error> {
        if step == 0 {
            return Ok(());
        }
        latch_direction(self, step)?;
        for _ in 0..step.abs() {
            self.ctrl_write(CTRL_OFFSET_STROBE, 0)?;
            self.ctrl_write(CTRL_OFFSET_STROBE, CLK_STROBE)?;
        }
        Ok(())
    }

    /// Read the current position of the clock delay. The counter is carried twice in the
    /// readback word; the halves disagreeing indicates a bus or fabric fault.
    fn delay_clk_get(&mut self) -> Result<u8, Error> {
        let raw = self.ctrl_read(CTRL_OFFSET_CLK_COUNT)?;
        let count = raw & CLK_COUNT_MASK;
        if count != (raw >> 5) & CLK_COUNT_MASK {
            let label = format!("Counter values not the same, got back {:#x}", raw);
            Err(Error::new(QdrCalError::HardwareInconsistent, &label))
        } else {
            Ok(count as u8)
        }
    }
}

impl<A: QdrRegisterAccess> QdrDelayOperation for A {}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct TestAccess {
        ctrl_writes: Vec<(usize, u32)>,
        clk_count: u32,
    }

    impl QdrRegisterAccess for TestAccess {
        fn ctrl_write(&mut self, word_offset: usize, value: u32) -> Result<(), Error> {
            self.ctrl_writes.push((word_offset, value));
            Ok(())
        }

        fn ctrl_read(&mut self, word_offset: usize) -> Result<u32, Error> {
            assert_eq!(word_offset, CTRL_OFFSET_CLK_COUNT);
            Ok(self.clk_count)
        }

        fn mem_write(&mut self, _: &[u8]) -> Result<(), Error> {
            unreachable!();
        }

        fn mem_read(&mut self, _: usize) -> Result<Vec<u8>, Error> {
            unreachable!();
        }
    }

    #[test]
    fn reset_write_sequence() {
        let mut access = TestAccess::default();
        access.reset().unwrap();
        assert_eq!(&access.ctrl_writes, &[(0, 1), (0, 0)]);
    }

    #[test]
    fn delay_in_step_write_sequence() {
        let mut access = TestAccess::default();
        access.delay_in_step(0xf_9abc_def0, 2).unwrap();
        assert_eq!(
            &access.ctrl_writes,
            &[
                (7, 0xffffffff),
                (4, 0),
                (5, 0),
                (4, 0x9abc_def0),
                (5, 0xf),
                (4, 0),
                (5, 0),
                (4, 0x9abc_def0),
                (5, 0xf),
            ]
        );
    }

    #[test]
    fn delay_out_step_write_sequence() {
        let mut access = TestAccess::default();
        access.delay_out_step(0x3_0000_00ff, -1).unwrap();
        assert_eq!(
            &access.ctrl_writes,
            &[(7, 0), (6, 0), (5, 0), (6, 0xff), (5, 0x30)]
        );
    }

    #[test]
    fn delay_clk_step_write_sequence() {
        let mut access = TestAccess::default();
        access.delay_clk_step(3).unwrap();
        assert_eq!(
            &access.ctrl_writes,
            &[(7, 0xffffffff), (5, 0), (5, 0x100), (5, 0), (5, 0x100), (5, 0), (5, 0x100)]
        );
    }

    #[test]
    fn delay_step_zero_writes_nothing() {
        let mut access = TestAccess::default();
        access.delay_in_step(ALL_BITS, 0).unwrap();
        access.delay_out_step(ALL_BITS, 0).unwrap();
        access.delay_clk_step(0).unwrap();
        assert_eq!(access.ctrl_writes.len(), 0);
    }

    #[test]
    fn delay_step_write_count() {
        for step in 1..5 {
            let mut access = TestAccess::default();
            access.delay_in_step(ALL_BITS, step).unwrap();
            assert_eq!(access.ctrl_writes.len(), 1 + 4 * step as usize);

            let mut access = TestAccess::default();
            access.delay_out_step(ALL_BITS, -step).unwrap();
            assert_eq!(access.ctrl_writes.len(), 1 + 4 * step as usize);

            let mut access = TestAccess::default();
            access.delay_clk_step(step).unwrap();
            assert_eq!(access.ctrl_writes.len(), 1 + 2 * step as usize);
        }
    }

    #[test]
    fn delay_clk_get_consistent() {
        let mut access = TestAccess::default();
        access.clk_count = 0x15 | (0x15 << 5);
        assert_eq!(access.delay_clk_get().unwrap(), 0x15);
    }

    #[test]
    fn delay_clk_get_inconsistent() {
        let mut access = TestAccess::default();
        access.clk_count = 0x15 | (0x16 << 5);
        let e = access.delay_clk_get().unwrap_err();
        assert_eq!(e.kind::<QdrCalError>(), Some(QdrCalError::HardwareInconsistent));
    }
}
