/// Header at the start of every N5 chunk.
///
/// All fields are big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct N5ChunkHeader {
    pub(crate) mode: N5ChunkMode,
    /// Column-major: the reverse of the zarr chunk shape.
    pub(crate) shape: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum N5ChunkMode {
    Default = 0,
    VarLen { num_el: u32 } = 1,
    Object = 2,
}

fn read_be<const N: usize>(bytes: &[u8], offset: &mut usize) -> crate::Result<[u8; N]> {
    let out: [u8; N] = bytes
        .get(*offset..*offset + N)
        .ok_or_else(|| {
            crate::Error::general(format!(
                "N5 chunk header truncated at byte {} of {}",
                *offset,
                bytes.len()
            ))
        })?
        .try_into()
        .map_err(crate::Error::wrap)?;
    *offset += N;
    Ok(out)
}

impl N5ChunkHeader {
    /// Header for a default-mode chunk with the given column-major shape.
    pub fn new(shape: Vec<u32>) -> Self {
        Self {
            mode: N5ChunkMode::Default,
            shape,
        }
    }

    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    /// Number of elements described by the shape, or `None` if that overflows.
    pub fn num_elements(&self) -> Option<u64> {
        match self.mode {
            N5ChunkMode::VarLen { num_el } => Some(num_el as u64),
            _ => self
                .shape
                .iter()
                .try_fold(1u64, |acc, &n| acc.checked_mul(n as u64)),
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut offset: usize = 0;

        let mode_num = u16::from_be_bytes(read_be(bytes, &mut offset)?);
        let ndim = u16::from_be_bytes(read_be(bytes, &mut offset)?);
        let mut shape = Vec::with_capacity(ndim as usize);
        for _ in 0..ndim {
            shape.push(u32::from_be_bytes(read_be(bytes, &mut offset)?));
        }

        let mode = match mode_num {
            0 => N5ChunkMode::Default,
            1 => N5ChunkMode::VarLen {
                num_el: u32::from_be_bytes(read_be(bytes, &mut offset)?),
            },
            2 => N5ChunkMode::Object,
            n => return Err(crate::Error::general(format!("invalid N5 chunk mode {n}"))),
        };
        Ok(N5ChunkHeader { mode, shape })
    }

    /// Append the header to `out`.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) -> crate::Result<()> {
        let ndim = u16::try_from(self.shape.len()).map_err(|_| {
            crate::Error::general(format!("too many dimensions for N5: {}", self.shape.len()))
        })?;
        let mode_num: u16 = match self.mode {
            N5ChunkMode::Default => 0,
            N5ChunkMode::VarLen { .. } => 1,
            N5ChunkMode::Object => 2,
        };
        out.reserve(self.data_offset());
        out.extend_from_slice(&mode_num.to_be_bytes());
        out.extend_from_slice(&ndim.to_be_bytes());
        for n in &self.shape {
            out.extend_from_slice(&n.to_be_bytes());
        }
        if let N5ChunkMode::VarLen { num_el } = self.mode {
            out.extend_from_slice(&num_el.to_be_bytes());
        }
        Ok(())
    }

    pub(crate) fn data_offset(&self) -> usize {
        size_of::<u16>()  // mode discriminator
            + size_of::<u16>() // ndim
            + self.shape.len() * size_of::<u32>()  // shape
            + match self.mode {
                N5ChunkMode::VarLen { .. } => size_of::<u32>(),
                _ => 0,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_round_trip() {
        let header = N5ChunkHeader::new(vec![3, 4, 5]);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            [0, 0, 0, 3, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0, 5]
        );
        assert_eq!(header.data_offset(), bytes.len());
        assert_eq!(N5ChunkHeader::from_bytes(&bytes).unwrap(), header);
        assert_eq!(header.num_elements(), Some(60));
    }

    #[test]
    fn varlen_header() {
        let bytes = [0, 1, 0, 1, 0, 0, 0, 2, 0, 0, 0, 9, 0xff];
        let header = N5ChunkHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.mode, N5ChunkMode::VarLen { num_el: 9 });
        assert_eq!(header.data_offset(), 12);
        assert_eq!(header.num_elements(), Some(9));
    }

    #[test]
    fn num_elements_overflow() {
        let header = N5ChunkHeader::new(vec![u32::MAX; 3]);
        assert_eq!(header.num_elements(), None);
        let header = N5ChunkHeader::new(vec![u32::MAX, 2]);
        assert_eq!(header.num_elements(), Some(u32::MAX as u64 * 2));
    }

    #[test]
    fn truncated_header() {
        assert!(N5ChunkHeader::from_bytes(&[0, 0, 0, 2, 0, 0]).is_err());
        assert!(N5ChunkHeader::from_bytes(&[]).is_err());
    }

    #[test]
    fn invalid_mode() {
        assert!(N5ChunkHeader::from_bytes(&[0, 7, 0, 0]).is_err());
    }
}
