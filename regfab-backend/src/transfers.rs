//! [`regfab_accessor::RawTransfer`] implementations gluing a
//! [`crate::RawBarChannel`] to the scalar/1-D and 2-D muxed accessor shapes
//! described in spec.md §4.9's `getRegisterAccessor` dispatch table.

use std::sync::Arc;

use regfab_accessor::RawTransfer;
use regfab_catalogue::{ChannelInfo, NumericType};
use regfab_types::{FixedPointConverter, NumericConverter, NumericValue, RegisterAccessError, RuntimeError};

use crate::bar_channel::RawBarChannel;

/// Per-channel codec: how a channel's raw bytes map to/from a cooked value.
#[derive(Clone)]
enum Codec {
    FixedPoint(FixedPointConverter),
    Ieee754,
    Ascii,
    Raw,
}

fn codec_for(data_type: NumericType, width: u8, n_fractional_bits: i16, signed: bool, raw_mode: bool) -> Codec {
    if raw_mode {
        return Codec::Raw;
    }
    match data_type {
        NumericType::Ieee754 => Codec::Ieee754,
        NumericType::Ascii => Codec::Ascii,
        NumericType::FixedPoint | NumericType::Void => Codec::FixedPoint(FixedPointConverter::new(width.max(1), n_fractional_bits, signed)),
    }
}

fn decode<T: NumericValue>(codec: &Codec, raw: u32) -> T {
    match codec {
        Codec::FixedPoint(conv) => conv.to_cooked(raw),
        Codec::Ieee754 => NumericConverter::convert::<f32, T>(f32::from_bits(raw)),
        Codec::Ascii => T::from_canonical(regfab_types::Canonical::Unsigned((raw & 0xFF) as u128)),
        Codec::Raw => T::from_canonical(regfab_types::Canonical::Unsigned(raw as u128)),
    }
}

fn encode<T: NumericValue>(codec: &Codec, cooked: T) -> u32 {
    match codec {
        Codec::FixedPoint(conv) => conv.to_raw(cooked),
        Codec::Ieee754 => NumericConverter::convert::<T, f32>(cooked).to_bits(),
        Codec::Ascii => match cooked.to_canonical() {
            regfab_types::Canonical::Unsigned(v) => (v & 0xFF) as u32,
            regfab_types::Canonical::Signed(v) => (v as u32) & 0xFF,
            _ => 0,
        },
        Codec::Raw => match cooked.to_canonical() {
            regfab_types::Canonical::Unsigned(v) => v as u32,
            regfab_types::Canonical::Signed(v) => v as u32,
            regfab_types::Canonical::Float(v) => v as u32,
            regfab_types::Canonical::Void => 0,
        },
    }
}

/// One-off decode of a single channel's raw word, for callers (the async
/// fan-out path) that only have a [`ChannelInfo`] and not a cached [`Codec`].
pub(crate) fn decode_for_channel<T: NumericValue>(ch: &ChannelInfo, raw: u32) -> T {
    let codec = codec_for(ch.data_type, ch.width, ch.n_fractional_bits, ch.signed, false);
    decode::<T>(&codec, raw)
}

pub(crate) fn read_word_le(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}

fn write_word_le(value: u32, out: &mut [u8]) {
    let bytes = value.to_le_bytes();
    let n = out.len().min(4);
    out.copy_from_slice(&bytes[..n]);
}

/// Scalar / 1-D transfer: a single channel, repeated `n_elements` times at
/// `element_pitch_bytes` spacing.
pub struct BarWordTransfer<T> {
    channel: Arc<dyn RawBarChannel>,
    bar: u32,
    address: u64,
    n_elements: usize,
    element_pitch_bytes: u64,
    word_bytes: usize,
    codec: Codec,
    _marker: std::marker::PhantomData<T>,
}

impl<T> BarWordTransfer<T> {
    pub fn new(
        channel: Arc<dyn RawBarChannel>,
        bar: u32,
        address: u64,
        n_elements: usize,
        element_pitch_bits: u32,
        ch: &ChannelInfo,
        raw_mode: bool,
    ) -> Self {
        let codec = codec_for(ch.data_type, ch.width, ch.n_fractional_bits, ch.signed, raw_mode);
        let word_bytes = ((ch.width as usize) + 7) / 8;
        Self {
            channel,
            bar,
            address,
            n_elements,
            element_pitch_bytes: (element_pitch_bits / 8) as u64,
            word_bytes: word_bytes.max(1),
            codec,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: NumericValue + Send> RawTransfer<T> for BarWordTransfer<T> {
    fn read_transfer(&mut self, buffer: &mut [Vec<T>]) -> Result<(), RegisterAccessError> {
        let channel = &buffer[0];
        let mut raw = vec![0u8; self.word_bytes];
        let mut decoded = Vec::with_capacity(channel.len().max(self.n_elements));
        for i in 0..self.n_elements {
            let offset = self.address + i as u64 * self.element_pitch_bytes;
            self.channel.read(self.bar, offset, &mut raw)?;
            decoded.push(decode::<T>(&self.codec, read_word_le(&raw)));
        }
        buffer[0] = decoded;
        Ok(())
    }

    fn write_transfer(&mut self, buffer: &[Vec<T>]) -> Result<bool, RegisterAccessError> {
        let mut raw = vec![0u8; self.word_bytes];
        for (i, value) in buffer[0].iter().enumerate().take(self.n_elements) {
            write_word_le(encode(&self.codec, *value), &mut raw);
            let offset = self.address + i as u64 * self.element_pitch_bytes;
            self.channel.write(self.bar, offset, &raw)?;
        }
        Ok(false)
    }
}

/// 2-D muxed transfer: one block per `n_elements`, scattered across
/// `channels` by each channel's `(bitOffset, width)` within the block.
pub struct MuxedBarTransfer<T> {
    channel: Arc<dyn RawBarChannel>,
    bar: u32,
    address: u64,
    n_elements: usize,
    element_pitch_bytes: u64,
    channels: Vec<ChannelInfo>,
    codecs: Vec<Codec>,
    raw_mode: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T> MuxedBarTransfer<T> {
    pub fn new(
        channel: Arc<dyn RawBarChannel>,
        bar: u32,
        address: u64,
        n_elements: usize,
        element_pitch_bits: u32,
        channels: Vec<ChannelInfo>,
        raw_mode: bool,
    ) -> Self {
        let codecs = channels.iter().map(|c| codec_for(c.data_type, c.width, c.n_fractional_bits, c.signed, raw_mode)).collect();
        Self {
            channel,
            bar,
            address,
            n_elements,
            element_pitch_bytes: (element_pitch_bits / 8) as u64,
            channels,
            codecs,
            raw_mode,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: NumericValue + Send> RawTransfer<T> for MuxedBarTransfer<T> {
    fn read_transfer(&mut self, buffer: &mut [Vec<T>]) -> Result<(), RegisterAccessError> {
        if self.raw_mode {
            return Err(RegisterAccessError::runtime("raw access is not supported on multiplexed registers"));
        }
        let mut block = vec![0u8; self.element_pitch_bytes as usize];
        for block_idx in 0..self.n_elements {
            let offset = self.address + block_idx as u64 * self.element_pitch_bytes;
            self.channel.read(self.bar, offset, &mut block)?;
            for (ch_idx, ch) in self.channels.iter().enumerate() {
                let byte_offset = (ch.bit_offset / 8) as usize;
                let word_bytes = ((ch.width as usize) + 7) / 8;
                let raw = read_word_le(&block[byte_offset..byte_offset + word_bytes]);
                buffer[ch_idx][block_idx] = decode::<T>(&self.codecs[ch_idx], raw);
            }
        }
        Ok(())
    }

    fn write_transfer(&mut self, buffer: &[Vec<T>]) -> Result<bool, RegisterAccessError> {
        if self.raw_mode {
            return Err(RuntimeError::Other("raw access is not supported on multiplexed registers".into()).into());
        }
        let mut block = vec![0u8; self.element_pitch_bytes as usize];
        for block_idx in 0..self.n_elements {
            let offset = self.address + block_idx as u64 * self.element_pitch_bytes;
            self.channel.read(self.bar, offset, &mut block)?;
            for (ch_idx, ch) in self.channels.iter().enumerate() {
                let byte_offset = (ch.bit_offset / 8) as usize;
                let word_bytes = ((ch.width as usize) + 7) / 8;
                let raw = encode(&self.codecs[ch_idx], buffer[ch_idx][block_idx]);
                write_word_le(raw, &mut block[byte_offset..byte_offset + word_bytes]);
            }
            self.channel.write(self.bar, offset, &block)?;
        }
        Ok(false)
    }
}
