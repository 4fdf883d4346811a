/// Data validity of a transfer. Ordered so that `Faulty` "wins": a decorator
/// may elevate the validity reported by an underlying layer but never
/// downgrade it (SPEC_FULL.md §4.6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataValidity {
    #[default]
    Ok,
    Faulty,
}

impl DataValidity {
    /// Combines two validities, keeping the worse (stickier) one.
    pub fn combine(self, other: DataValidity) -> DataValidity {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faulty_is_sticky() {
        assert_eq!(DataValidity::Ok.combine(DataValidity::Faulty), DataValidity::Faulty);
        assert_eq!(DataValidity::Faulty.combine(DataValidity::Ok), DataValidity::Faulty);
        assert_eq!(DataValidity::Ok.combine(DataValidity::Ok), DataValidity::Ok);
    }
}
