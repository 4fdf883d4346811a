//! C9 — NumericAddressedBackend (spec.md §4.9): the trait every numeric-
//! addressed backend implements, plus the accessor-factory dispatch that
//! glues C2 (fixed-point codec), C5 (catalogue), C6 (accessor) and C7/C8
//! (async distribution) together.

use std::sync::Arc;

use regfab_accessor::{AsyncAccessor, NDRegisterAccessor, SyncAccessor};
use regfab_async::{DomainId, DomainsContainer};
use regfab_catalogue::{NumericAddressedRegisterCatalogue, NumericType, RegisterAccess, RegisterInfo};
use regfab_types::{AccessMode, AccessModeFlags, LogicError, NumericValue, RegisterAccessError, RegisterPath, RuntimeError, VersionNumber, Void};

use crate::bar_channel::RawBarChannel;
use crate::multiplexer::DomainMultiplexer;
use crate::transfers::{BarWordTransfer, MuxedBarTransfer};
use crate::RawSample;

/// Runtime tag for one of the fixed set of user types C9's accessor factory
/// supports, standing in for a generic `get_register_accessor<T>` the way
/// [`regfab_types::Canonical`] stands in for C1's arithmetic conversions:
/// the backend core stays object-safe, and the one `match` in
/// [`build_accessor`] is the only place the type set has to be named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Void,
}

/// A constructed accessor, type-erased down to the bounded set `TypeTag`
/// enumerates.
pub enum AnyAccessor {
    I8(Box<dyn NDRegisterAccessor<i8>>),
    I16(Box<dyn NDRegisterAccessor<i16>>),
    I32(Box<dyn NDRegisterAccessor<i32>>),
    I64(Box<dyn NDRegisterAccessor<i64>>),
    U8(Box<dyn NDRegisterAccessor<u8>>),
    U16(Box<dyn NDRegisterAccessor<u16>>),
    U32(Box<dyn NDRegisterAccessor<u32>>),
    U64(Box<dyn NDRegisterAccessor<u64>>),
    F32(Box<dyn NDRegisterAccessor<f32>>),
    F64(Box<dyn NDRegisterAccessor<f64>>),
    Void(Box<dyn NDRegisterAccessor<Void>>),
}

/// Implemented for every type `TypeTag` names; lets
/// [`NumericAddressedBackendExt::get_register_accessor`] hand callers back a
/// correctly typed accessor without the core trait needing a generic method.
pub trait SupportedType: NumericValue + Send + Sync + Default + 'static {
    const TAG: TypeTag;
    fn wrap(accessor: Box<dyn NDRegisterAccessor<Self>>) -> AnyAccessor;
    fn unwrap(any: AnyAccessor) -> Result<Box<dyn NDRegisterAccessor<Self>>, LogicError>;
}

macro_rules! impl_supported_type {
    ($t:ty, $tag:ident, $variant:ident) => {
        impl SupportedType for $t {
            const TAG: TypeTag = TypeTag::$tag;
            fn wrap(accessor: Box<dyn NDRegisterAccessor<Self>>) -> AnyAccessor {
                AnyAccessor::$variant(accessor)
            }
            fn unwrap(any: AnyAccessor) -> Result<Box<dyn NDRegisterAccessor<Self>>, LogicError> {
                match any {
                    AnyAccessor::$variant(a) => Ok(a),
                    _ => Err(LogicError::Other(format!("accessor type mismatch: expected {}", stringify!($variant)))),
                }
            }
        }
    };
}

impl_supported_type!(i8, I8, I8);
impl_supported_type!(i16, I16, I16);
impl_supported_type!(i32, I32, I32);
impl_supported_type!(i64, I64, I64);
impl_supported_type!(u8, U8, U8);
impl_supported_type!(u16, U16, U16);
impl_supported_type!(u32, U32, U32);
impl_supported_type!(u64, U64, U64);
impl_supported_type!(f32, F32, F32);
impl_supported_type!(f64, F64, F64);
impl_supported_type!(Void, Void, Void);

/// Core, object-safe backend contract (spec.md §4.9).
pub trait NumericAddressedBackend: Send + Sync {
    fn catalogue(&self) -> &NumericAddressedRegisterCatalogue;
    fn bar_channel(&self) -> Arc<dyn RawBarChannel>;
    fn domains(&self) -> &Arc<DomainsContainer<RawSample>>;
    fn active_exception(&self) -> Option<RuntimeError>;
    fn set_active_exception(&self, error: Option<RuntimeError>);
    fn open_impl(&self) -> Result<(), RegisterAccessError>;
    fn close_impl(&self) -> Result<(), RegisterAccessError>;

    /// BAR 0..5 are physical, 13+ are DMA channels; override for backends
    /// with a different virtual BAR map.
    fn bar_index_valid(&self, bar: u32) -> bool {
        bar <= 5 || bar >= 13
    }

    /// Idempotent: calling `open` on an already-open backend is a no-op,
    /// since `open_impl` is expected to handle that itself for most
    /// backends; this default just clears any stale exception on success.
    #[tracing::instrument(skip(self))]
    fn open(&self) -> Result<(), RegisterAccessError> {
        self.open_impl()?;
        self.set_active_exception(None);
        self.activate_async_read();
        Ok(())
    }

    /// Rearms interrupt-driven reads after `open` (spec.md §4.9): called
    /// once the backend is known good, before any subscriber is expected to
    /// receive data. Backends whose interrupt source is always armed (shared
    /// memory, a socket) have nothing to do here.
    fn activate_async_read(&self) {}

    /// Step 4 of the subscribe handshake (spec.md §4.8): told which domain
    /// just gained a subscriber, before [`Self::get_async_domain_initial_value`]
    /// is read. A real hardware backend would use this to tell the device to
    /// start raising the interrupt; the default is a no-op.
    fn activate_subscription(&self, domain_id: DomainId) -> Result<(), RegisterAccessError> {
        let _ = domain_id;
        Ok(())
    }

    /// Synchronously reads `info`'s current contents as raw 32-bit words, one
    /// vec per channel, so a domain can `activate` with real data instead of
    /// leaving a subscriber that joined before the first interrupt waiting.
    fn get_async_domain_initial_value(&self, info: &RegisterInfo) -> Result<RawSample, RegisterAccessError> {
        if let Some(e) = self.active_exception() {
            return Err(e.into());
        }
        read_raw_sample(&*self.bar_channel(), info)
    }

    /// Flips every domain to `Inactive` before calling `close_impl`, so no
    /// subscriber observes a spurious push after the backend considers
    /// itself closed.
    fn close(&self) -> Result<(), RegisterAccessError> {
        self.domains().for_each(|_, domain| domain.deactivate());
        self.close_impl()
    }

    fn read(&self, bar: u32, address: u64, data: &mut [u8]) -> Result<(), RegisterAccessError> {
        if let Some(e) = self.active_exception() {
            return Err(e.into());
        }
        self.bar_channel().read(bar, address, data)
    }

    fn write(&self, bar: u32, address: u64, data: &[u8]) -> Result<(), RegisterAccessError> {
        if let Some(e) = self.active_exception() {
            return Err(e.into());
        }
        self.bar_channel().write(bar, address, data)
    }

    /// Records an active exception and asks the domain registry to broadcast
    /// it; clears any `asyncIsActive` accounting implicitly by leaving every
    /// domain's own state machine to react via `sendException`.
    fn set_exception(&self, message: String) {
        self.domains().send_exceptions(message.clone());
        self.set_active_exception(Some(RuntimeError::ActiveException(message)));
    }

    fn get_register_accessor_any(
        &self,
        path: &RegisterPath,
        n_elements: usize,
        offset: usize,
        flags: AccessModeFlags,
        tag: TypeTag,
    ) -> Result<AnyAccessor, RegisterAccessError> {
        build_accessor(self, path, n_elements, offset, flags, tag)
    }
}

/// Blanket extension giving callers the ergonomic `get_register_accessor::<T>()`
/// the core trait can't offer directly without losing object safety.
pub trait NumericAddressedBackendExt: NumericAddressedBackend {
    fn get_register_accessor<T: SupportedType>(
        &self,
        path: &RegisterPath,
        n_elements: usize,
        offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
        let any = self.get_register_accessor_any(path, n_elements, offset, flags, T::TAG)?;
        T::unwrap(any).map_err(RegisterAccessError::from)
    }
}

impl<B: NumericAddressedBackend + ?Sized> NumericAddressedBackendExt for B {}

fn build_accessor(
    backend: &(impl NumericAddressedBackend + ?Sized),
    path: &RegisterPath,
    n_elements: usize,
    offset: usize,
    flags: AccessModeFlags,
    tag: TypeTag,
) -> Result<AnyAccessor, RegisterAccessError> {
    macro_rules! dispatch {
        ($t:ty) => {
            build_typed::<$t>(backend, path, n_elements, offset, flags).map(<$t as SupportedType>::wrap)
        };
    }
    match tag {
        TypeTag::I8 => dispatch!(i8),
        TypeTag::I16 => dispatch!(i16),
        TypeTag::I32 => dispatch!(i32),
        TypeTag::I64 => dispatch!(i64),
        TypeTag::U8 => dispatch!(u8),
        TypeTag::U16 => dispatch!(u16),
        TypeTag::U32 => dispatch!(u32),
        TypeTag::U64 => dispatch!(u64),
        TypeTag::F32 => dispatch!(f32),
        TypeTag::F64 => dispatch!(f64),
        TypeTag::Void => dispatch!(Void),
    }
}

fn build_typed<T: SupportedType>(
    backend: &(impl NumericAddressedBackend + ?Sized),
    path: &RegisterPath,
    n_elements: usize,
    offset: usize,
    flags: AccessModeFlags,
) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
    let info = backend.catalogue().get_backend_register(path)?;
    let requested = if n_elements == 0 { info.n_elements } else { n_elements };
    if offset + requested > info.n_elements {
        return Err(LogicError::Other(format!(
            "{}: requested {} elements at offset {} exceeds {} available",
            path, requested, offset, info.n_elements
        ))
        .into());
    }
    flags.check_for_unknown_flags(AccessModeFlags::RAW | AccessModeFlags::WAIT_FOR_NEW_DATA).map_err(|unknown| {
        RegisterAccessError::from(LogicError::Other(format!("{path}: unsupported access mode flags {unknown:?}")))
    })?;
    if info.is_multiplexed() && flags.has(AccessMode::Raw) {
        return Err(LogicError::Other(format!("{path}: raw access is not supported on multiplexed registers")).into());
    }

    if flags.has(AccessMode::WaitForNewData) {
        build_async::<T>(backend, &info)
    } else {
        build_sync::<T>(backend, &info, offset, requested, flags.has(AccessMode::Raw))
    }
}

fn build_sync<T: SupportedType>(
    backend: &(impl NumericAddressedBackend + ?Sized),
    info: &RegisterInfo,
    offset: usize,
    n_elements: usize,
    raw_mode: bool,
) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
    let readable = info.access != RegisterAccess::WriteOnly;
    let writable = info.access == RegisterAccess::ReadWrite || info.access == RegisterAccess::WriteOnly;
    let element_address = info.address + offset as u64 * (info.element_pitch_bits / 8) as u64;
    let channel = backend.bar_channel();
    let mut flags = AccessModeFlags::empty();
    if raw_mode {
        flags |= AccessModeFlags::RAW;
    }

    if info.is_multiplexed() {
        let transfer = MuxedBarTransfer::<T>::new(channel, info.bar, element_address, n_elements, info.element_pitch_bits, info.channels.clone(), raw_mode);
        let accessor = SyncAccessor::new(info.n_channels, n_elements, readable, writable, flags, None, Box::new(transfer));
        Ok(Box::new(accessor))
    } else {
        let transfer = BarWordTransfer::<T>::new(channel, info.bar, element_address, n_elements, info.element_pitch_bits, &info.channels[0], raw_mode);
        let accessor = SyncAccessor::new(1, n_elements, readable, writable, flags, None, Box::new(transfer));
        Ok(Box::new(accessor))
    }
}

/// Reads `info`'s current contents straight off `channel` and decodes each
/// word to its channel's raw 32-bit form, bypassing any backend-level
/// exception check. Used both by the default `get_async_domain_initial_value`
/// and by interrupt sources (e.g. the shared-dummy cross-process dispatcher)
/// that read hardware state directly, without a full backend handle.
pub fn read_raw_sample(channel: &dyn RawBarChannel, info: &RegisterInfo) -> Result<RawSample, RegisterAccessError> {
    let n_channels = info.n_channels.max(1);
    let element_pitch_bytes = (info.element_pitch_bits / 8).max(1) as u64;
    let mut sample: RawSample = vec![Vec::with_capacity(info.n_elements); n_channels];
    let mut block = vec![0u8; element_pitch_bytes as usize];
    for block_idx in 0..info.n_elements {
        let offset = info.address + block_idx as u64 * element_pitch_bytes;
        channel.read(info.bar, offset, &mut block)?;
        for (ch_idx, ch) in info.channels.iter().enumerate() {
            let byte_offset = (ch.bit_offset / 8) as usize;
            let word_bytes = (((ch.width as usize) + 7) / 8).max(1);
            sample[ch_idx].push(crate::transfers::read_word_le(&block[byte_offset..byte_offset + word_bytes]));
        }
    }
    Ok(sample)
}

fn build_async<T: SupportedType>(
    backend: &(impl NumericAddressedBackend + ?Sized),
    info: &RegisterInfo,
) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
    if info.access != RegisterAccess::Interrupt {
        return Err(LogicError::UnsupportedAccessMode { path: info.path.to_string(), mode: "wait_for_new_data".into() }.into());
    }
    let domain_id = *info
        .interrupt_id
        .first()
        .ok_or_else(|| LogicError::Other(format!("{}: INTERRUPT register has no interrupt id", info.path)))?;

    let accessor: AsyncAccessor<T> = AsyncAccessor::new(info.n_channels, info.n_elements);
    let handle = accessor.distributor_handle();
    let channels = info.channels.clone();

    let (domain, target, _created) = DomainsContainer::subscribe(backend.domains(), domain_id, || {
        Arc::new(DomainMultiplexer::new()) as Arc<dyn regfab_async::Distributor<RawSample>>
    });

    // The target is always our own `DomainMultiplexer`: every subscriber for
    // a given domain in this workspace goes through one, constructed above.
    let multiplexer = target
        .as_any()
        .downcast_ref::<DomainMultiplexer>()
        .expect("DomainsContainer target is always a DomainMultiplexer in this workspace");
    let convert_handle = handle.clone();
    let convert_channels = channels.clone();
    multiplexer.add_subscriber(
        Box::new(move |raw: &RawSample, version| {
            let converted: Vec<Vec<T>> = raw
                .iter()
                .enumerate()
                .map(|(ch_idx, samples)| {
                    let codec_channel = &convert_channels[ch_idx.min(convert_channels.len() - 1)];
                    samples
                        .iter()
                        .map(|&word| crate::transfers::decode_for_channel::<T>(codec_channel, word))
                        .collect()
                })
                .collect();
            convert_handle.distribute(converted, version);
        }),
        Box::new(move |error| handle.send_exception(error.clone())),
    );

    // Step 4 of the subscribe handshake (spec.md §4.8): arm the domain on the
    // backend side, read its current contents, and activate it so this
    // subscriber (and any other already on the domain) gets real data
    // instead of waiting indefinitely for the first interrupt.
    backend.activate_subscription(domain_id)?;
    let initial = backend.get_async_domain_initial_value(info)?;
    domain.activate(initial, VersionNumber::new());

    Ok(Box::new(accessor))
}

