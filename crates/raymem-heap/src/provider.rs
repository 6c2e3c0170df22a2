//! Raw memory providers.
//!
//! A [`RawProvider`] is the seam between the tracked heaps and whatever
//! actually supplies bytes. Providers hand out zeroed, exactly-sized
//! blocks and report failure as `None`; the registry turns that into
//! [`HeapError::ProviderExhausted`](crate::HeapError::ProviderExhausted)
//! without masking it.

/// Source of raw, zeroed byte blocks.
pub trait RawProvider {
    /// Reserve a zeroed block of exactly `len` bytes.
    ///
    /// Returns `None` if the request cannot be satisfied.
    fn allocate(&mut self, len: usize) -> Option<Box<[u8]>>;

    /// Return a block previously obtained from [`RawProvider::allocate`].
    fn release(&mut self, block: Box<[u8]>);

    /// Bytes currently handed out and not yet released.
    fn bytes_in_use(&self) -> usize;
}

/// Provider backed by the global allocator.
///
/// Uses a fallible reservation so that allocator failure surfaces as
/// `None` instead of aborting the process.
#[derive(Debug, Default)]
pub struct SystemProvider {
    in_use: usize,
}

impl SystemProvider {
    /// Create a provider with nothing handed out.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawProvider for SystemProvider {
    fn allocate(&mut self, len: usize) -> Option<Box<[u8]>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        self.in_use += len;
        Some(buf.into_boxed_slice())
    }

    fn release(&mut self, block: Box<[u8]>) {
        self.in_use = self.in_use.saturating_sub(block.len());
    }

    fn bytes_in_use(&self) -> usize {
        self.in_use
    }
}

/// Provider that refuses requests beyond a fixed byte budget.
#[derive(Debug)]
pub struct BudgetProvider<P = SystemProvider> {
    inner: P,
    budget: usize,
}

impl<P: RawProvider> BudgetProvider<P> {
    /// Wrap `inner`, refusing any request that would push usage past `budget`.
    pub fn new(inner: P, budget: usize) -> Self {
        Self { inner, budget }
    }

    /// The configured byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Bytes still available under the budget.
    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.inner.bytes_in_use())
    }
}

impl<P: RawProvider> RawProvider for BudgetProvider<P> {
    fn allocate(&mut self, len: usize) -> Option<Box<[u8]>> {
        let after = self.inner.bytes_in_use().checked_add(len)?;
        if after > self.budget {
            return None;
        }
        self.inner.allocate(len)
    }

    fn release(&mut self, block: Box<[u8]>) {
        self.inner.release(block);
    }

    fn bytes_in_use(&self) -> usize {
        self.inner.bytes_in_use()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_blocks_are_zeroed_and_exact() {
        let mut provider = SystemProvider::new();
        let block = provider.allocate(64).unwrap();
        assert_eq!(block.len(), 64);
        assert!(block.iter().all(|&b| b == 0));
        assert_eq!(provider.bytes_in_use(), 64);
        provider.release(block);
        assert_eq!(provider.bytes_in_use(), 0);
    }

    #[test]
    fn zero_length_block_is_valid() {
        let mut provider = SystemProvider::new();
        let block = provider.allocate(0).unwrap();
        assert!(block.is_empty());
    }

    #[test]
    fn budget_refuses_overflowing_request() {
        let mut provider = BudgetProvider::new(SystemProvider::new(), 100);
        let a = provider.allocate(60).unwrap();
        assert!(provider.allocate(41).is_none());
        assert_eq!(provider.remaining(), 40);
        let b = provider.allocate(40).unwrap();
        assert_eq!(provider.remaining(), 0);
        provider.release(a);
        provider.release(b);
        assert_eq!(provider.bytes_in_use(), 0);
    }

    #[test]
    fn budget_rejects_usize_overflow() {
        let mut provider = BudgetProvider::new(SystemProvider::new(), usize::MAX);
        let _held = provider.allocate(8).unwrap();
        assert!(provider.allocate(usize::MAX).is_none());
    }
}
