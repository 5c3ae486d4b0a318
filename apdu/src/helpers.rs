// Copyright (c) 2022-2023 The Cardlock Authors

/// Encoding helper for fixed size arrays (pending nightly array constructors)
pub(crate) mod arr {
    use encdec::Error;

    pub fn enc<const N: usize>(d: &[u8; N], buff: &mut [u8]) -> Result<usize, Error> {
        if buff.len() < d.len() {
            return Err(Error::Length);
        }

        buff[..d.len()].copy_from_slice(&d[..]);

        Ok(d.len())
    }

    pub fn enc_len<const N: usize>(d: &[u8; N]) -> Result<usize, Error> {
        Ok(d.len())
    }

    pub fn dec<const N: usize>(buff: &[u8]) -> Result<([u8; N], usize), Error> {
        if buff.len() < N {
            return Err(Error::Length);
        }

        let mut d = [0u8; N];
        d.copy_from_slice(&buff[..N]);

        Ok((d, N))
    }
}

/// Encoding helper for big-endian `u32` fields (card / host wire order)
pub(crate) mod be32 {
    use byteorder::{BigEndian, ByteOrder};
    use encdec::Error;

    pub fn enc(v: &u32, buff: &mut [u8]) -> Result<usize, Error> {
        if buff.len() < 4 {
            return Err(Error::Length);
        }

        BigEndian::write_u32(buff, *v);

        Ok(4)
    }

    pub fn enc_len(_v: &u32) -> Result<usize, Error> {
        Ok(4)
    }

    pub fn dec(buff: &[u8]) -> Result<(u32, usize), Error> {
        if buff.len() < 4 {
            return Err(Error::Length);
        }

        Ok((BigEndian::read_u32(buff), 4))
    }
}

/// Minimal TLV (`[TAG][LEN][VALUE]`) helpers for card payloads
pub(crate) mod tlv {
    use crate::{ApduError, Tag};

    /// Write a single TLV entry, returning the number of bytes written
    pub fn write(buff: &mut [u8], tag: Tag, value: &[u8]) -> Result<usize, ApduError> {
        if value.len() > u8::MAX as usize || buff.len() < value.len() + 2 {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = tag as u8;
        buff[1] = value.len() as u8;
        buff[2..][..value.len()].copy_from_slice(value);

        Ok(value.len() + 2)
    }

    /// Iterator over TLV entries, unknown tags are returned as raw bytes
    pub struct Entries<'a> {
        buff: &'a [u8],
        index: usize,
    }

    pub fn entries(buff: &[u8]) -> Entries<'_> {
        Entries { buff, index: 0 }
    }

    impl<'a> Iterator for Entries<'a> {
        type Item = Result<(u8, &'a [u8]), ApduError>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.index >= self.buff.len() {
                return None;
            }

            let rem = &self.buff[self.index..];
            if rem.len() < 2 || rem.len() < 2 + rem[1] as usize {
                // Truncated entry, stop iteration after reporting
                self.index = self.buff.len();
                return Some(Err(ApduError::InvalidLength));
            }

            let (tag, len) = (rem[0], rem[1] as usize);
            self.index += 2 + len;

            Some(Ok((tag, &rem[2..][..len])))
        }
    }

    /// Copy a TLV value into a fixed size field
    pub fn copy<const N: usize>(value: &[u8]) -> Result<[u8; N], ApduError> {
        if value.len() != N {
            return Err(ApduError::InvalidLength);
        }

        let mut d = [0u8; N];
        d.copy_from_slice(value);
        Ok(d)
    }
}
