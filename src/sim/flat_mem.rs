use crate::base::mem::HasMemory;

/// Zero-initialised byte store backing the simulated backend.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
}

impl HasMemory for FlatMemory {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read_impl(&self, addr: usize, n: usize) -> Result<&[u8], anyhow::Error> {
        Ok(&self.bytes[addr..addr + n])
    }

    fn write_impl(&mut self, addr: usize, data: &[u8]) -> Result<(), anyhow::Error> {
        self.bytes[addr..addr + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl FlatMemory {
    pub fn new_with_size(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let mut mem = FlatMemory::new_with_size(256);
        mem.write(0x10, &[1, 2, 3, 4]).unwrap();
        assert_eq!([1, 2, 3, 4], mem.read_n::<4>(0x10).unwrap());
        assert_eq!(&[0, 0], mem.read(0x14, 2).unwrap());
    }

    #[test]
    fn swap_returns_previous_bytes() {
        let mut mem = FlatMemory::new_with_size(64);
        mem.write(8, &[9; 4]).unwrap();
        assert_eq!(vec![9; 4], mem.swap(8, &[1; 4]).unwrap());
        assert_eq!(&[1; 4], mem.read(8, 4).unwrap());
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut mem = FlatMemory::new_with_size(64);
        assert!(mem.read(62, 4).is_err());
        assert!(mem.write(64, &[0]).is_err());
        assert!(mem.read(60, 4).is_ok());
    }
}
