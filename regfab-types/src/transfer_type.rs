/// The kind of transfer being performed, threaded through the pre/post
/// transfer hooks of [the accessor protocol](crate) (C6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum TransferType {
    Read,
    ReadNonBlocking,
    ReadLatest,
    Write,
    WriteDestructively,
}

impl TransferType {
    pub fn is_read(self) -> bool {
        matches!(self, TransferType::Read | TransferType::ReadNonBlocking | TransferType::ReadLatest)
    }

    pub fn is_write(self) -> bool {
        matches!(self, TransferType::Write | TransferType::WriteDestructively)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_kind_is_read_xor_write() {
        for kind in TransferType::iter() {
            assert_ne!(kind.is_read(), kind.is_write());
        }
    }
}
