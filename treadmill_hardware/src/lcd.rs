//! 16x2 HD44780 character LCD in 4-bit mode.

use std::thread::sleep;
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};
use tracing::trace;
use treadmill_traits::{BoxError, DisplayDriver};

use crate::error::Result;

pub const COLS: usize = 16;
pub const ROWS: usize = 2;
const ROW_OFFSETS: [u8; ROWS] = [0x00, 0x40];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LcdPins {
    pub rs: u8,
    pub en: u8,
    pub d4: u8,
    pub d5: u8,
    pub d6: u8,
    pub d7: u8,
}

pub struct Hd44780 {
    rs: OutputPin,
    en: OutputPin,
    data: [OutputPin; 4],
}

impl core::fmt::Debug for Hd44780 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hd44780").finish_non_exhaustive()
    }
}

impl Hd44780 {
    pub fn new(gpio: &Gpio, pins: LcdPins) -> Result<Self> {
        let out = |pin: u8| -> Result<OutputPin> {
            let mut p = gpio.get(pin)?.into_output();
            p.set_low();
            Ok(p)
        };
        let mut lcd = Self {
            rs: out(pins.rs)?,
            en: out(pins.en)?,
            data: [out(pins.d4)?, out(pins.d5)?, out(pins.d6)?, out(pins.d7)?],
        };
        lcd.init();
        Ok(lcd)
    }

    fn init(&mut self) {
        sleep(Duration::from_millis(50));
        for _ in 0..3 {
            self.nibble(0x03);
            sleep(Duration::from_millis(5));
        }
        self.nibble(0x02);
        self.command(0x28); // 4-bit, 2 lines, 5x8
        self.command(0x0C); // display on, cursor off
        self.command(0x06); // entry: increment, no shift
        self.clear_screen();
    }

    fn pulse(&mut self) {
        self.en.set_high();
        sleep(Duration::from_micros(1));
        self.en.set_low();
        sleep(Duration::from_micros(50));
    }

    fn nibble(&mut self, bits: u8) {
        for (i, pin) in self.data.iter_mut().enumerate() {
            if bits >> i & 1 == 1 {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        self.pulse();
    }

    fn send(&mut self, byte: u8, is_data: bool) {
        if is_data {
            self.rs.set_high();
        } else {
            self.rs.set_low();
        }
        self.nibble(byte >> 4);
        self.nibble(byte & 0x0F);
    }

    fn command(&mut self, byte: u8) {
        self.send(byte, false);
    }

    fn clear_screen(&mut self) {
        self.command(0x01);
        sleep(Duration::from_millis(2));
    }

    fn set_cursor(&mut self, col: usize, row: usize) {
        let row = row.min(ROWS - 1);
        let col = u8::try_from(col.min(COLS - 1)).unwrap_or(0);
        self.command(0x80 | (col + ROW_OFFSETS[row]));
    }
}

/// Lay text out on the panel: one line per row, truncated to the width.
pub fn layout(text: &str) -> [String; ROWS] {
    let mut rows: [String; ROWS] = Default::default();
    for (row, line) in text.split('\n').take(ROWS).enumerate() {
        rows[row] = line
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .take(COLS)
            .collect();
    }
    rows
}

impl DisplayDriver for Hd44780 {
    fn write(&mut self, text: &str) -> std::result::Result<(), BoxError> {
        self.clear_screen();
        for (row, line) in layout(text).iter().enumerate() {
            self.set_cursor(0, row);
            for b in line.bytes() {
                self.send(b, true);
            }
        }
        trace!(%text, "lcd write");
        Ok(())
    }

    fn clear(&mut self) -> std::result::Result<(), BoxError> {
        self.clear_screen();
        Ok(())
    }
}
