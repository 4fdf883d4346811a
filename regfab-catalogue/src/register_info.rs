//! Register descriptor data model (SPEC_FULL.md §3).

use regfab_types::{LogicError, RegisterPath};

/// Storage interpretation of a channel's raw bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericType {
    FixedPoint,
    Ieee754,
    Ascii,
    Void,
}

/// Access mode a register supports, independent of the per-accessor
/// [`regfab_types::AccessModeFlags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterAccess {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    Interrupt,
}

/// One channel of a (possibly multiplexed) register.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelInfo {
    pub bit_offset: u32,
    pub data_type: NumericType,
    pub width: u8,
    pub n_fractional_bits: i16,
    pub signed: bool,
}

/// Full description of one register, as built by the map-file parser or
/// synthesized for a numeric-address pseudo-path.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterInfo {
    pub path: RegisterPath,
    pub n_elements: usize,
    pub n_channels: usize,
    pub address: u64,
    pub size_in_bytes: u64,
    pub bar: u32,
    pub element_pitch_bits: u32,
    pub channels: Vec<ChannelInfo>,
    pub access: RegisterAccess,
    pub interrupt_id: Vec<u32>,
    pub data_consistency_realm: Option<String>,
}

impl RegisterInfo {
    /// A scalar or 1-D register: a single channel repeated `n_elements`
    /// times at `element_pitch_bits` spacing.
    #[allow(clippy::too_many_arguments)]
    pub fn new_one_d(
        path: RegisterPath,
        n_elements: usize,
        address: u64,
        bar: u32,
        width: u8,
        data_type: NumericType,
        n_fractional_bits: i16,
        signed: bool,
        access: RegisterAccess,
        interrupt_id: Vec<u32>,
    ) -> Result<Self, LogicError> {
        let element_pitch_bits = ((width as u32) + 7) / 8 * 8;
        let element_pitch_bits = element_pitch_bits.max(8);
        let size_in_bytes = n_elements as u64 * element_pitch_bits as u64 / 8;
        let info = RegisterInfo {
            path,
            n_elements,
            n_channels: 1,
            address,
            size_in_bytes,
            bar,
            element_pitch_bits,
            channels: vec![ChannelInfo { bit_offset: 0, data_type, width, n_fractional_bits, signed }],
            access,
            interrupt_id,
            data_consistency_realm: None,
        };
        info.validate()?;
        Ok(info)
    }

    /// A 2-D multiplexed register: `channels` describe one block, repeated
    /// `n_elements` (blocks) times at `element_pitch_bits` spacing.
    #[allow(clippy::too_many_arguments)]
    pub fn new_two_d(
        path: RegisterPath,
        n_elements: usize,
        address: u64,
        bar: u32,
        element_pitch_bits: u32,
        channels: Vec<ChannelInfo>,
        access: RegisterAccess,
        interrupt_id: Vec<u32>,
    ) -> Result<Self, LogicError> {
        let n_channels = channels.len();
        let size_in_bytes = n_elements as u64 * element_pitch_bits as u64 / 8;
        let info = RegisterInfo {
            path,
            n_elements,
            n_channels,
            address,
            size_in_bytes,
            bar,
            element_pitch_bits,
            channels,
            access,
            interrupt_id,
            data_consistency_realm: None,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn is_multiplexed(&self) -> bool {
        self.n_channels > 1
    }

    pub fn validate(&self) -> Result<(), LogicError> {
        if self.element_pitch_bits % 8 != 0 {
            return Err(LogicError::Other(format!(
                "{}: elementPitchBits {} is not a multiple of 8",
                self.path, self.element_pitch_bits
            )));
        }
        for ch in &self.channels {
            if ch.bit_offset + ch.width as u32 > self.element_pitch_bits {
                return Err(LogicError::Other(format!(
                    "{}: channel at bit offset {} width {} exceeds element pitch {}",
                    self.path, ch.bit_offset, ch.width, self.element_pitch_bits
                )));
            }
            if ch.width > 32 {
                return Err(LogicError::Other(format!("{}: channel width {} exceeds 32 bits", self.path, ch.width)));
            }
            if ch.width == 0 && ch.data_type != NumericType::Void {
                return Err(LogicError::Other(format!("{}: width 0 requires Void data type", self.path)));
            }
            if !(-1024..=1023).contains(&ch.n_fractional_bits) {
                return Err(LogicError::InvalidFixedPoint {
                    message: format!("{}: nFractionalBits {} out of range", self.path, ch.n_fractional_bits),
                });
            }
        }
        let expected_size = self.n_elements as u64 * self.element_pitch_bits as u64 / 8;
        if expected_size != self.size_in_bytes {
            return Err(LogicError::Other(format!(
                "{}: sizeInBytes {} does not match nElements*elementPitchBits/8 ({})",
                self.path, self.size_in_bytes, expected_size
            )));
        }
        let all_void = self.channels.iter().all(|c| c.data_type == NumericType::Void);
        if all_void && self.access != RegisterAccess::Interrupt {
            return Err(LogicError::Other(format!("{}: Void register must have INTERRUPT access", self.path)));
        }
        if self.access == RegisterAccess::Interrupt && self.interrupt_id.is_empty() {
            return Err(LogicError::Other(format!("{}: INTERRUPT register has no interrupt id", self.path)));
        }
        Ok(())
    }
}
