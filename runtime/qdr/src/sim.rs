// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Software model of the QDR controller fabric.
//!
//! The model implements the word protocol of the control register faithfully enough to stand
//! in for a programmed FPGA: edge-detected strobe pulses, the direction latch, the reset bit,
//! and the duplicated clock-tap readback. Each observable data line gets a passing window
//! over the input-tap range, drawn from a seeded generator; reading the memory window flips
//! every line whose current input tap lies outside its window. The model backs bench runs of
//! the service and the tests of the batch driver.

use {
    super::*,
    glib::FileError,
    rand::{rngs::SmallRng, Rng, SeedableRng},
    std::sync::{Arc, Mutex},
};

const CTRL_OFFSET_RESET: usize = 0;
const CTRL_OFFSET_IN_DATA: usize = 4;
const CTRL_OFFSET_STROBE: usize = 5;
const CTRL_OFFSET_OUT_DATA: usize = 6;
const CTRL_OFFSET_DIRECTION: usize = 7;
const CTRL_OFFSET_CLK_COUNT: usize = 8;

struct SimQdrState {
    in_taps: [u8; TOTAL_BITS],
    out_taps: [u8; TOTAL_BITS],
    clk_tap: u8,
    increment: bool,
    reset_bit: u32,
    in_data: u32,
    out_data: u32,
    strobe: u32,
    memory: Vec<u8>,
    // Inclusive input-tap window in which each observable line samples cleanly.
    eyes: [(u8, u8); OBSERVABLE_BITS],
}

impl SimQdrState {
    fn new(rng: &mut SmallRng, window_length: usize) -> Self {
        let mut eyes = [(0, 0); OBSERVABLE_BITS];
        eyes.iter_mut().for_each(|eye| {
            let begin = rng.gen_range(2..10);
            let width = rng.gen_range(8..=20);
            *eye = (begin, (begin + width).min(DELAY_TAP_COUNT - 1));
        });
        SimQdrState {
            in_taps: [0; TOTAL_BITS],
            out_taps: [0; TOTAL_BITS],
            clk_tap: 0,
            increment: true,
            reset_bit: 0,
            in_data: 0,
            out_data: 0,
            strobe: 0,
            memory: vec![0; window_length],
            eyes,
        }
    }

    fn step_tap(tap: &mut u8, increment: bool) {
        if increment {
            if *tap < DELAY_TAP_COUNT - 1 {
                *tap += 1;
            }
        } else if *tap > 0 {
            *tap -= 1;
        }
    }

    fn reset(&mut self) {
        self.in_taps = [0; TOTAL_BITS];
        self.out_taps = [0; TOTAL_BITS];
        self.clk_tap = 0;
    }

    fn ctrl_write(&mut self, word_offset: usize, value: u32) {
        match word_offset {
            CTRL_OFFSET_RESET => {
                if value & !self.reset_bit & 1 > 0 {
                    self.reset();
                }
                self.reset_bit = value & 1;
            }
            CTRL_OFFSET_IN_DATA => {
                let risen = value & !self.in_data;
                let increment = self.increment;
                self.in_taps[..OBSERVABLE_BITS]
                    .iter_mut()
                    .enumerate()
                    .filter(|(bit, _)| risen & (1 << bit) > 0)
                    .for_each(|(_, tap)| Self::step_tap(tap, increment));
                self.in_data = value;
            }
            CTRL_OFFSET_OUT_DATA => {
                let risen = value & !self.out_data;
                let increment = self.increment;
                self.out_taps[..OBSERVABLE_BITS]
                    .iter_mut()
                    .enumerate()
                    .filter(|(bit, _)| risen & (1 << bit) > 0)
                    .for_each(|(_, tap)| Self::step_tap(tap, increment));
                self.out_data = value;
            }
            CTRL_OFFSET_STROBE => {
                let risen = value & !self.strobe;
                let increment = self.increment;
                for bit in 0..(TOTAL_BITS - OBSERVABLE_BITS) {
                    if risen & (1 << bit) > 0 {
                        Self::step_tap(&mut self.in_taps[OBSERVABLE_BITS + bit], increment);
                    }
                    if risen & (1 << (bit + 4)) > 0 {
                        Self::step_tap(&mut self.out_taps[OBSERVABLE_BITS + bit], increment);
                    }
                }
                if risen & (1 << 8) > 0 {
                    Self::step_tap(&mut self.clk_tap, increment);
                }
                self.strobe = value;
            }
            CTRL_OFFSET_DIRECTION => {
                self.increment = value > 0;
            }
            _ => (),
        }
    }

    fn ctrl_read(&self, word_offset: usize) -> u32 {
        match word_offset {
            CTRL_OFFSET_CLK_COUNT => {
                let count = self.clk_tap as u32;
                count | (count << 5)
            }
            _ => 0,
        }
    }

    fn corrupt_mask(&self) -> u32 {
        self.eyes
            .iter()
            .enumerate()
            .filter(|(bit, &(begin, end))| {
                let tap = self.in_taps[*bit];
                tap < begin || tap > end
            })
            .fold(0, |mask, (bit, _)| mask | (1 << bit))
    }
}

/// Access handle of one simulated QDR controller.
pub struct SimQdrAccess {
    state: Arc<Mutex<SimQdrState>>,
}

fn poisoned_state_err() -> Error {
    Error::new(FileError::Failed, "Simulated controller state is poisoned")
}

impl QdrRegisterAccess for SimQdrAccess {
    fn ctrl_write(&mut self, word_offset: usize, value: u32) -> Result<(), Error> {
        if let Ok(mut state) = self.state.lock() {
            state.ctrl_write(word_offset, value);
            Ok(())
        } else {
            Err(poisoned_state_err())
        }
    }

    fn ctrl_read(&mut self, word_offset: usize) -> Result<u32, Error> {
        if let Ok(state) = self.state.lock() {
            Ok(state.ctrl_read(word_offset))
        } else {
            Err(poisoned_state_err())
        }
    }

    fn mem_write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Ok(mut state) = self.state.lock() {
            let count = bytes.len().min(state.memory.len());
            state.memory[..count].copy_from_slice(&bytes[..count]);
            Ok(())
        } else {
            Err(poisoned_state_err())
        }
    }

    fn mem_read(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        if let Ok(state) = self.state.lock() {
            let count = count.min(state.memory.len());
            let mask = state.corrupt_mask();
            let data = state.memory[..count]
                .chunks_exact(4)
                .flat_map(|quadlet| {
                    let mut frame = [0; 4];
                    frame.copy_from_slice(quadlet);
                    (u32::from_be_bytes(frame) ^ mask).to_be_bytes().to_vec()
                })
                .collect();
            Ok(data)
        } else {
            Err(poisoned_state_err())
        }
    }
}

/// One simulated FPGA host carrying a handful of QDR controllers.
pub struct SimFpga {
    host: String,
    qdrs: Vec<Qdr>,
    states: Vec<Arc<Mutex<SimQdrState>>>,
}

impl SimFpga {
    /// Build a host with `qdr_count` controllers whose per-line skew is drawn from the seed.
    pub fn new(host: &str, qdr_count: usize, seed: u64) -> Result<Self, Error> {
        let mut rng = SmallRng::seed_from_u64(seed);

        let mut memorymap = BTreeMap::new();
        for i in 0..qdr_count {
            memorymap.insert(
                format!("qdr{}_memory", i),
                MemoryMapEntry {
                    address: 0x0010_0000 * (i as u32 + 1),
                    bytes: 0x1000,
                },
            );
            memorymap.insert(
                format!("qdr{}_ctrl", i),
                MemoryMapEntry {
                    address: 0x0000_9000 + 0x100 * i as u32,
                    bytes: 36,
                },
            );
        }

        let qdrs = (0..qdr_count)
            .map(|i| {
                let which_qdr = format!("qdr{}", i);
                Qdr::from_device_info(&which_qdr, &which_qdr, &memorymap)
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let states = qdrs
            .iter()
            .map(|qdr| Arc::new(Mutex::new(SimQdrState::new(&mut rng, qdr.length))))
            .collect();

        Ok(SimFpga {
            host: host.to_string(),
            qdrs,
            states,
        })
    }
}

impl FpgaSession for SimFpga {
    type Access = SimQdrAccess;

    fn host(&self) -> &str {
        &self.host
    }

    fn targets(&self) -> Vec<(Qdr, Self::Access)> {
        self.qdrs
            .iter()
            .zip(&self.states)
            .map(|(qdr, state)| {
                (
                    qdr.clone(),
                    SimQdrAccess {
                        state: Arc::clone(state),
                    },
                )
            })
            .collect()
    }
}
