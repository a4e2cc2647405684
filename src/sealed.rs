//! Sealing helper shared by traits that must stay closed to downstream impls.

pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
