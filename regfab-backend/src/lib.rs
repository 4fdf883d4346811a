//! C9 (NumericAddressedBackend), the `RawBarChannel` ioctl-glue seam, C14
//! (MappedImage/MappedStruct) and the `BackendFactory` registry trait, from
//! SPEC_FULL.md §4.9, §4.14, §10.

mod backend;
mod bar_channel;
mod factory;
mod mapped_image;
mod multiplexer;
mod transfers;

pub use backend::{read_raw_sample, AnyAccessor, NumericAddressedBackend, NumericAddressedBackendExt, SupportedType, TypeTag};
pub use bar_channel::RawBarChannel;
pub use factory::BackendFactory;
pub use mapped_image::{FieldWidth, MappedImage, MappedImageField};
pub use multiplexer::DomainMultiplexer;
pub use transfers::{BarWordTransfer, MuxedBarTransfer};

/// Raw distribution unit: one interrupt-triggered block, read as plain
/// 32-bit words before any per-subscriber conversion (spec.md §2's data-flow
/// note: "on interrupt, the backend pushes one sample into each domain").
pub type RawSample = regfab_accessor::Sample<u32>;
