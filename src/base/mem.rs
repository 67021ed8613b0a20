use anyhow::bail;

/// Trait for byte-addressed backing stores behind the simulated backend.
pub trait HasMemory {
    fn size(&self) -> usize;

    fn read_impl(&self, addr: usize, n: usize) -> Result<&[u8], anyhow::Error>;
    fn read(&self, addr: u64, n: usize) -> Result<&[u8], anyhow::Error> {
        let addr = self.check_range(addr, n)?;
        self.read_impl(addr, n)
    }
    fn read_n<const N: usize>(&self, addr: u64) -> Result<[u8; N], anyhow::Error> {
        let slice = self.read(addr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<(), anyhow::Error>;
    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), anyhow::Error> {
        let addr = self.check_range(addr, data.len())?;
        self.write_impl(addr, data)
    }

    /// Store `data` and return what was there before.
    fn swap(&mut self, addr: u64, data: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        let old = self.read(addr, data.len())?.to_vec();
        self.write(addr, data)?;
        Ok(old)
    }

    fn check_range(&self, addr: u64, n: usize) -> Result<usize, anyhow::Error> {
        // zero-length accesses are a caller bug, not a program error
        assert!(n > 0, "zero-length memory access @ {:#x}", addr);
        let Ok(start) = usize::try_from(addr) else {
            bail!("address {:#x} does not fit the host address space", addr);
        };
        match start.checked_add(n) {
            Some(end) if end <= self.size() => Ok(start),
            _ => bail!(
                "memory access of size {} @ {:#x} exceeds {} byte store",
                n,
                addr,
                self.size()
            ),
        }
    }
}
