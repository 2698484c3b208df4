use nalgebra::{SVector, Scalar};

use super::buffer::{WireBuffer, WireError};

/// Binary representation of a value inside a [WireBuffer].
///
/// Scalars are stored in their native byte layout.
/// Sequences store their element count as a native `usize` followed by each element.
pub trait WireFormat: Sized {
    /// Appends the binary representation of `self` at the cursor of the buffer.
    fn write_wire(&self, buffer: &mut WireBuffer);

    /// Reads a value from the cursor of the buffer.
    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError>;
}

macro_rules! impl_wire_format_native(
    ($($numeric:ty),+) => {
        $(
            impl WireFormat for $numeric {
                fn write_wire(&self, buffer: &mut WireBuffer) {
                    buffer.write_raw(&self.to_ne_bytes());
                }

                fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
                    let bytes = buffer.read_array::<{ core::mem::size_of::<$numeric>() }>()?;
                    Ok(<$numeric>::from_ne_bytes(bytes))
                }
            }
        )+
    }
);

impl_wire_format_native!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl WireFormat for bool {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&(*self as u8));
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        match buffer.read::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(WireError::InvalidValue(format!(
                "byte {} does not represent a boolean",
                value
            ))),
        }
    }
}

impl WireFormat for String {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write_blob(self.as_bytes());
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        String::from_utf8(buffer.read_blob()?)
            .map_err(|e| WireError::InvalidValue(format!("string is not valid utf-8: {}", e)))
    }
}

impl<T> WireFormat for Option<T>
where
    T: WireFormat,
{
    fn write_wire(&self, buffer: &mut WireBuffer) {
        match self {
            Some(value) => {
                buffer.write(&true);
                buffer.write(value);
            }
            None => buffer.write(&false),
        }
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        if buffer.read::<bool>()? {
            Ok(Some(buffer.read()?))
        } else {
            Ok(None)
        }
    }
}

impl<T> WireFormat for Vec<T>
where
    T: WireFormat,
{
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.len());
        self.iter().for_each(|value| buffer.write(value));
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        let n = buffer.read::<usize>()?;
        // Every element occupies at least one byte unless it is zero-sized.
        let mut values = Vec::with_capacity(n.min(buffer.remaining()));
        for _ in 0..n {
            values.push(buffer.read()?);
        }
        Ok(values)
    }
}

impl<T, const N: usize> WireFormat for [T; N]
where
    T: WireFormat,
{
    fn write_wire(&self, buffer: &mut WireBuffer) {
        self.iter().for_each(|value| buffer.write(value));
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        let values = (0..N)
            .map(|_| buffer.read::<T>())
            .collect::<Result<Vec<_>, _>>()?;
        values
            .try_into()
            .map_err(|_| WireError::InvalidValue(format!("expected array of length {}", N)))
    }
}

impl<T, const D: usize> WireFormat for SVector<T, D>
where
    T: WireFormat + Scalar,
{
    fn write_wire(&self, buffer: &mut WireBuffer) {
        self.iter().for_each(|value| buffer.write(value));
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        let components = buffer.read::<[T; D]>()?;
        Ok(SVector::<T, D>::from(components))
    }
}

impl<A, B> WireFormat for (A, B)
where
    A: WireFormat,
    B: WireFormat,
{
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.0);
        buffer.write(&self.1);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        let a = buffer.read()?;
        let b = buffer.read()?;
        Ok((a, b))
    }
}

impl WireFormat for fieldline_concepts::DomainId {
    fn write_wire(&self, buffer: &mut WireBuffer) {
        buffer.write(&self.0);
    }

    fn read_wire(buffer: &mut WireBuffer) -> Result<Self, WireError> {
        Ok(Self(buffer.read()?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_length_sequence() {
        let mut buffer = WireBuffer::new();
        buffer.write(&Vec::<f64>::new());
        assert_eq!(buffer.len(), core::mem::size_of::<usize>());
        buffer.rewind();
        assert_eq!(buffer.read::<Vec<f64>>().unwrap(), Vec::<f64>::new());

        // The count is part of the sequence so reading from an empty buffer must fail
        let mut empty = WireBuffer::new();
        assert!(matches!(
            empty.read::<Vec<f64>>(),
            Err(WireError::OutOfRange { .. })
        ));
        // Zero raw bytes can always be read
        assert!(empty.read_raw(0).is_ok());
    }

    #[test]
    fn sequence_count_is_native_usize() {
        let mut buffer = WireBuffer::new();
        buffer.write(&vec![1_u8, 2, 3]);
        buffer.rewind();
        assert_eq!(buffer.read::<usize>().unwrap(), 3);
        assert_eq!(buffer.read_raw(3).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn native_layout() {
        let mut buffer = WireBuffer::new();
        buffer.write(&1.25_f64);
        buffer.write(&0x0102_u16);
        assert_eq!(&buffer.as_bytes()[..8], &1.25_f64.to_ne_bytes());
        assert_eq!(&buffer.as_bytes()[8..], &0x0102_u16.to_ne_bytes());
    }

    #[test]
    fn corrupt_boolean() {
        let mut buffer = WireBuffer::from_bytes(vec![2]);
        assert!(matches!(
            buffer.read::<bool>(),
            Err(WireError::InvalidValue(_))
        ));
    }

    #[test]
    fn corrupt_string() {
        let mut buffer = WireBuffer::new();
        buffer.write_blob(&[0xff, 0xfe]);
        buffer.rewind();
        assert!(matches!(
            buffer.read::<String>(),
            Err(WireError::InvalidValue(_))
        ));
    }

    #[test]
    fn truncated_sequence() {
        let mut buffer = WireBuffer::new();
        buffer.write(&vec![1.0_f64, 2.0, 3.0]);
        let bytes = buffer.as_bytes()[..buffer.len() - 1].to_vec();
        let mut truncated = WireBuffer::from_bytes(bytes);
        assert!(truncated.read::<Vec<f64>>().is_err());
    }

    #[test]
    fn huge_count_does_not_allocate() {
        let mut buffer = WireBuffer::new();
        buffer.write(&usize::MAX);
        buffer.rewind();
        assert!(buffer.read::<Vec<u64>>().is_err());
    }

    #[test]
    fn vectors_and_nested_sequences() {
        let mut buffer = WireBuffer::new();
        let v = SVector::<f64, 3>::from([1.0, -2.0, f64::MAX]);
        let nested = vec![vec![SVector::<f64, 2>::zeros()], vec![]];
        buffer.write(&v);
        buffer.write(&nested);
        buffer.write(&(7_u32, Some(v)));
        buffer.rewind();
        assert_eq!(buffer.read::<SVector<f64, 3>>().unwrap(), v);
        assert_eq!(buffer.read::<Vec<Vec<SVector<f64, 2>>>>().unwrap(), nested);
        assert_eq!(
            buffer.read::<(u32, Option<SVector<f64, 3>>)>().unwrap(),
            (7, Some(v))
        );
    }

    #[test]
    fn nan_payload_survives() {
        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        let mut buffer = WireBuffer::new();
        buffer.write(&nan);
        buffer.rewind();
        assert_eq!(buffer.read::<f64>().unwrap().to_bits(), nan.to_bits());
    }
}
