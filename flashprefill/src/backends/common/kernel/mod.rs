mod flash_prefill;

pub use flash_prefill::{FlashPrefill, FlashPrefillArguments, FlashPrefillDispatch, FlashPrefillSpecialization};

use super::Backend;
use crate::ArrayElement;

pub trait Kernels: Sized {
    type Backend: Backend<Kernels = Self>;

    type FlashPrefillKernel: FlashPrefillKernel<Backend = Self::Backend>;
}

/// One specialization of the varlen prefill attention.
pub trait FlashPrefillKernel: Sized {
    type Backend: Backend;

    fn new(
        context: &<Self::Backend as Backend>::Context,
        specialization: FlashPrefillSpecialization,
    ) -> Result<Self, <Self::Backend as Backend>::Error>;

    fn specialization(&self) -> &FlashPrefillSpecialization;

    /// Runs every active tile of `dispatch.grid` and stores the results.
    /// Arguments are validated by the caller.
    fn encode<T: ArrayElement>(
        &self,
        context: &<Self::Backend as Backend>::Context,
        dispatch: FlashPrefillDispatch<'_, '_, T>,
    ) -> Result<(), <Self::Backend as Backend>::Error>;
}
