//! Disposable handles for subscriptions and feature registrations.

/// A handle that releases something exactly once.
///
/// Implementations must tolerate `dispose` being called more than once; every
/// call after the first is a no-op returning `Ok(())`.
pub trait Disposable: Send {
    fn dispose(&mut self) -> anyhow::Result<()>;
}

/// Owned, type-erased disposable returned when a feature is wired up.
pub struct Registration(Box<dyn Disposable>);

impl Registration {
    #[must_use]
    pub fn new(inner: impl Disposable + 'static) -> Self {
        Self(Box::new(inner))
    }

    /// Wrap a closure that runs on the first `dispose` call only.
    #[must_use]
    pub fn from_fn(f: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        Self::new(FnDisposer(Some(f)))
    }

    /// A registration with nothing to release.
    #[must_use]
    pub fn noop() -> Self {
        Self::from_fn(|| Ok(()))
    }
}

impl Disposable for Registration {
    fn dispose(&mut self) -> anyhow::Result<()> {
        self.0.dispose()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Registration")
    }
}

struct FnDisposer<F>(Option<F>);

impl<F> Disposable for FnDisposer<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send,
{
    fn dispose(&mut self) -> anyhow::Result<()> {
        match self.0.take() {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}
