use crate::error::Result;

/// Something that produces a payload once and must be cleaned up afterwards.
///
/// [`crate::File::from_resource`] calls `acquire` immediately and `release` exactly once, when
/// the file is closed or dropped.
pub trait Resource<P> {
    fn acquire(&mut self) -> Result<P>;
    fn release(&mut self) -> Result<()>;
}

/// A [`Resource`] built from two closures.
pub struct FnResource<A, R> {
    acquire: A,
    release: R,
}

pub fn resource_fn<P, A, R>(acquire: A, release: R) -> FnResource<A, R>
where
    A: FnMut() -> Result<P>,
    R: FnMut() -> Result<()>,
{
    FnResource { acquire, release }
}

impl<P, A, R> Resource<P> for FnResource<A, R>
where
    A: FnMut() -> Result<P>,
    R: FnMut() -> Result<()>,
{
    fn acquire(&mut self) -> Result<P> {
        (self.acquire)()
    }

    fn release(&mut self) -> Result<()> {
        (self.release)()
    }
}
