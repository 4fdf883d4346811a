//! C4 (MapFileParser), C5 (BackendRegisterCatalogue) and the register
//! descriptor data model from SPEC_FULL.md §3/§4.3/§4.5.

mod catalogue;
mod map_file;
mod register_info;

pub use catalogue::NumericAddressedRegisterCatalogue;
pub use map_file::{MapFileParser, ParsedMapFile};
pub use register_info::{ChannelInfo, NumericType, RegisterAccess, RegisterInfo};
