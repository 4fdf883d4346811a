//! C14 — MappedImage / MappedStruct (SPEC_FULL.md §4.14): a self-describing
//! binary struct overlaid on a register's raw bytes, read back the way a
//! status block is reinterpreted as a native struct rather than decoded
//! through the per-channel numeric codec the rest of C9 uses.

use regfab_accessor::NDRegisterAccessor;
use regfab_catalogue::NumericType;
use regfab_types::{LogicError, RegisterAccessError};

/// Declared shape of one field in a [`MappedImage`]'s schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldWidth {
    Scalar(NumericType),
    Array(NumericType, usize),
}

/// One entry of a `mapped_struct!`-generated schema.
#[derive(Clone, Copy, Debug)]
pub struct MappedImageField {
    pub name: &'static str,
    pub byte_offset: usize,
    pub width: FieldWidth,
}

/// Implemented for every native type a [`MappedImage`] field can hold;
/// mirrors the bounded-type-set pattern [`crate::backend::SupportedType`]
/// uses for the accessor factory, here just for native-endian byte
/// reinterpretation instead of a codec.
pub trait MappedField: Copy + Default + 'static {
    const BYTES: usize;
    const CATEGORY: NumericType;
    fn read_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_mapped_field {
    ($t:ty, $category:ident) => {
        impl MappedField for $t {
            const BYTES: usize = std::mem::size_of::<$t>();
            const CATEGORY: NumericType = NumericType::$category;
            fn read_ne(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_ne_bytes(buf)
            }
            fn write_ne(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_mapped_field!(i8, FixedPoint);
impl_mapped_field!(i16, FixedPoint);
impl_mapped_field!(i32, FixedPoint);
impl_mapped_field!(i64, FixedPoint);
impl_mapped_field!(u8, FixedPoint);
impl_mapped_field!(u16, FixedPoint);
impl_mapped_field!(u32, FixedPoint);
impl_mapped_field!(u64, FixedPoint);
impl_mapped_field!(f32, Ieee754);
impl_mapped_field!(f64, Ieee754);

/// A raw-byte register accessor overlaid with a fixed field schema. `read`
/// fetches the whole block once; field getters then index straight into the
/// already-fetched buffer with no further I/O, and likewise for `write`.
pub struct MappedImage {
    accessor: Box<dyn NDRegisterAccessor<u8>>,
    schema: &'static [MappedImageField],
}

impl MappedImage {
    pub fn new(accessor: Box<dyn NDRegisterAccessor<u8>>, schema: &'static [MappedImageField]) -> Self {
        Self { accessor, schema }
    }

    pub fn read(&mut self) -> Result<(), RegisterAccessError> {
        self.accessor.read()
    }

    pub fn write(&mut self) -> Result<bool, RegisterAccessError> {
        self.accessor.write()
    }

    /// Returns the field in the schema with the given name, if any.
    pub fn find_field(&self, name: &str) -> Option<&'static MappedImageField> {
        self.schema.iter().find(|f| f.name == name)
    }

    /// Reads a scalar field out of the buffer already fetched by `read()`.
    pub fn get<T: MappedField>(&self, field: &MappedImageField) -> Result<T, LogicError> {
        match field.width {
            FieldWidth::Scalar(category) => self.get_at(field.byte_offset, category, field.name),
            FieldWidth::Array(..) => Err(LogicError::Other(format!("field '{}' is an array, not a scalar", field.name))),
        }
    }

    /// Reads one element of an array field.
    pub fn get_indexed<T: MappedField>(&self, field: &MappedImageField, index: usize) -> Result<T, LogicError> {
        match field.width {
            FieldWidth::Array(category, len) => {
                if index >= len {
                    return Err(LogicError::Other(format!("field '{}' index {index} out of bounds ({len} elements)", field.name)));
                }
                self.get_at(field.byte_offset + index * T::BYTES, category, field.name)
            }
            FieldWidth::Scalar(_) => Err(LogicError::Other(format!("field '{}' is scalar, not an array", field.name))),
        }
    }

    fn get_at<T: MappedField>(&self, byte_offset: usize, category: NumericType, name: &str) -> Result<T, LogicError> {
        check_category::<T>(category, name)?;
        let buffer = &self.accessor.buffer()[0];
        if byte_offset + T::BYTES > buffer.len() {
            return Err(LogicError::Other(format!("field '{name}' at byte {byte_offset} exceeds image of {} bytes", buffer.len())));
        }
        Ok(T::read_ne(&buffer[byte_offset..byte_offset + T::BYTES]))
    }

    /// Stages a scalar field into the write buffer; call `write()` to commit.
    pub fn set<T: MappedField>(&mut self, field: &MappedImageField, value: T) -> Result<(), LogicError> {
        match field.width {
            FieldWidth::Scalar(category) => self.set_at(field.byte_offset, category, field.name, value),
            FieldWidth::Array(..) => Err(LogicError::Other(format!("field '{}' is an array, not a scalar", field.name))),
        }
    }

    pub fn set_indexed<T: MappedField>(&mut self, field: &MappedImageField, index: usize, value: T) -> Result<(), LogicError> {
        match field.width {
            FieldWidth::Array(category, len) => {
                if index >= len {
                    return Err(LogicError::Other(format!("field '{}' index {index} out of bounds ({len} elements)", field.name)));
                }
                self.set_at(field.byte_offset + index * T::BYTES, category, field.name, value)
            }
            FieldWidth::Scalar(_) => Err(LogicError::Other(format!("field '{}' is scalar, not an array", field.name))),
        }
    }

    fn set_at<T: MappedField>(&mut self, byte_offset: usize, category: NumericType, name: &str, value: T) -> Result<(), LogicError> {
        check_category::<T>(category, name)?;
        let buffer = &mut self.accessor.buffer_mut()[0];
        if byte_offset + T::BYTES > buffer.len() {
            return Err(LogicError::Other(format!("field '{name}' at byte {byte_offset} exceeds image of {} bytes", buffer.len())));
        }
        value.write_ne(&mut buffer[byte_offset..byte_offset + T::BYTES]);
        Ok(())
    }
}

fn check_category<T: MappedField>(declared: NumericType, name: &str) -> Result<(), LogicError> {
    let compatible = declared == T::CATEGORY || (declared == NumericType::Ascii && T::BYTES == 1 && T::CATEGORY == NumericType::FixedPoint);
    if compatible {
        Ok(())
    } else {
        Err(LogicError::Other(format!("field '{name}' type mismatch: declared {declared:?}, requested {:?}", T::CATEGORY)))
    }
}

/// Declarative macro building a `&'static [MappedImageField]` schema, modeled
/// on the teacher's opcode-table macros: `mapped_struct!(STATUS_FIELDS {
/// code: 0 => Scalar(FixedPoint), history: 4 => Array(FixedPoint, 8) })`.
#[macro_export]
macro_rules! mapped_struct {
    ($name:ident { $($field:ident : $offset:expr => $width:expr),+ $(,)? }) => {
        pub static $name: &[$crate::MappedImageField] = &[
            $(
                $crate::MappedImageField {
                    name: stringify!($field),
                    byte_offset: $offset,
                    width: $width,
                },
            )+
        ];
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use regfab_accessor::{NDRegisterAccessor, SyncAccessor};
    use regfab_types::{AccessModeFlags, RegisterAccessError};

    struct MemTransfer {
        bytes: Vec<u8>,
    }

    impl regfab_accessor::RawTransfer<u8> for MemTransfer {
        fn read_transfer(&mut self, buffer: &mut [Vec<u8>]) -> Result<(), RegisterAccessError> {
            buffer[0] = self.bytes.clone();
            Ok(())
        }
        fn write_transfer(&mut self, buffer: &[Vec<u8>]) -> Result<bool, RegisterAccessError> {
            self.bytes = buffer[0].clone();
            Ok(false)
        }
    }

    mapped_struct!(TEST_FIELDS {
        code: 0 => FieldWidth::Scalar(NumericType::FixedPoint),
        ratio: 4 => FieldWidth::Scalar(NumericType::Ieee754),
    });

    fn image_with(bytes: Vec<u8>) -> MappedImage {
        let len = bytes.len();
        let transfer = MemTransfer { bytes };
        let accessor: Box<dyn NDRegisterAccessor<u8>> =
            Box::new(SyncAccessor::new(1, len, true, true, AccessModeFlags::empty(), None, Box::new(transfer)));
        MappedImage::new(accessor, TEST_FIELDS)
    }

    #[test]
    fn reads_scalar_fields_after_one_transfer() {
        let mut buf = vec![0u8; 8];
        buf[0..4].copy_from_slice(&42i32.to_ne_bytes());
        buf[4..8].copy_from_slice(&1.5f32.to_ne_bytes());
        let mut image = image_with(buf);
        image.read().unwrap();
        assert_eq!(image.get::<i32>(&TEST_FIELDS[0]).unwrap(), 42);
        assert_eq!(image.get::<f32>(&TEST_FIELDS[1]).unwrap(), 1.5);
    }

    #[test]
    fn type_mismatch_is_a_logic_error() {
        let mut image = image_with(vec![0u8; 8]);
        image.read().unwrap();
        assert!(image.get::<f32>(&TEST_FIELDS[0]).is_err());
    }

    #[test]
    fn set_then_write_round_trips() {
        let mut image = image_with(vec![0u8; 8]);
        image.read().unwrap();
        image.set::<i32>(&TEST_FIELDS[0], 7).unwrap();
        image.write().unwrap();
        image.read().unwrap();
        assert_eq!(image.get::<i32>(&TEST_FIELDS[0]).unwrap(), 7);
    }
}
