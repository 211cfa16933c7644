//! Per-CPU `Decoder` implementations.
//!
//! One module per supported target; each exposes a zero-sized decoder
//! struct implementing [`crate::decoder::Decoder`].

pub mod avr;
pub mod hc11;
pub mod mcs51;

use crate::decoder::Decoder;

/// Target MCU selector, used by the CLI and the engine to pick a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mcu {
    Hc11,
    Avr,
    Mcs51,
}

impl Mcu {
    pub fn decoder(self) -> Box<dyn Decoder> {
        match self {
            Mcu::Hc11 => Box::new(hc11::Hc11Decoder::new()),
            Mcu::Avr => Box::new(avr::AvrDecoder::new()),
            Mcu::Mcs51 => Box::new(mcs51::Mcs51Decoder::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mcu::Hc11 => "hc11",
            Mcu::Avr => "avr",
            Mcu::Mcs51 => "mcs51",
        }
    }

    pub fn from_name(name: &str) -> Option<Mcu> {
        match name.to_ascii_lowercase().as_str() {
            "hc11" | "68hc11" | "mc68hc11" => Some(Mcu::Hc11),
            "avr" | "atmega" => Some(Mcu::Avr),
            "mcs51" | "8051" | "80c51" => Some(Mcu::Mcs51),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_recognizes_aliases() {
        assert_eq!(Mcu::from_name("8051"), Some(Mcu::Mcs51));
        assert_eq!(Mcu::from_name("AVR"), Some(Mcu::Avr));
        assert_eq!(Mcu::from_name("bogus"), None);
    }

    #[test]
    fn each_mcu_produces_a_decoder() {
        for mcu in [Mcu::Hc11, Mcu::Avr, Mcu::Mcs51] {
            assert_eq!(mcu.decoder().name().is_empty(), false);
        }
    }
}
